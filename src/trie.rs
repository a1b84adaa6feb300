//! The assembled trie: unigram array, n-gram block and quantizer.

use crate::builder::{self, RawNgram};
use crate::error::Result;
use crate::layout::{NodeRange, TrieLayout, Unigram};
use crate::quant::{QuantType, Quantizer};
use crate::storage::Storage;
use crate::WordId;

/// Memory usage of a trie.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrieStats {
    /// Unigram array, sentinel included
    pub unigram_bytes: usize,
    /// Bit-packed middle and longest tables
    pub ngram_bytes: usize,
    /// Quantizer bin tables
    pub quant_bytes: usize,
    pub total_bytes: usize,
}

/// Immutable n-gram language model trie.
///
/// Built once, then shared freely: scoring never mutates any table, so
/// `&NgramTrie` may be used from any number of threads at once.
#[derive(Debug)]
pub struct NgramTrie {
    pub(crate) counts: Vec<u64>,
    pub(crate) unigrams: Vec<Unigram>,
    pub(crate) layout: TrieLayout,
    pub(crate) block: Storage,
    pub(crate) quant: Quantizer,
}

impl NgramTrie {
    /// Build a trie from unigram weights and sorted per-order n-gram streams.
    ///
    /// See [`builder::build`] for the input contract.
    pub fn build(
        quant: QuantType,
        counts: &[u64],
        unigrams: Vec<Unigram>,
        streams: Vec<Vec<RawNgram>>,
    ) -> Result<Self> {
        let built = builder::build(quant, counts, unigrams, streams)?;
        Ok(Self {
            counts: built.counts,
            unigrams: built.unigrams,
            layout: built.layout,
            block: Storage::Owned(built.block),
            quant: built.quant,
        })
    }

    pub(crate) fn from_parts(
        counts: Vec<u64>,
        unigrams: Vec<Unigram>,
        mut layout: TrieLayout,
        block: Storage,
        quant: Quantizer,
    ) -> Self {
        layout.mark_loaded(&counts);
        Self {
            counts,
            unigrams,
            layout,
            block,
            quant,
        }
    }

    /// Highest n-gram order.
    #[inline]
    pub fn order(&self) -> usize {
        self.counts.len()
    }

    #[inline]
    pub fn vocab_size(&self) -> u64 {
        self.counts[0]
    }

    /// Number of stored n-grams per order, blank contexts included.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn quant_type(&self) -> QuantType {
        self.quant.kind()
    }

    pub fn is_mapped(&self) -> bool {
        self.block.is_mapped()
    }

    /// Unigram entry of `word`.
    pub fn unigram(&self, word: WordId) -> Option<&Unigram> {
        if u64::from(word) < self.vocab_size() {
            self.unigrams.get(word as usize)
        } else {
            None
        }
    }

    /// Child range of `word` in the order-2 table.
    #[inline]
    pub(crate) fn unigram_range(&self, word: WordId) -> NodeRange {
        let w = word as usize;
        NodeRange {
            begin: self.unigrams[w].next,
            end: self.unigrams[w + 1].next,
        }
    }

    pub(crate) fn block(&self) -> &[u8] {
        &self.block
    }

    pub fn memory_usage(&self) -> TrieStats {
        let unigram_bytes = self.unigrams.len() * crate::layout::UNIGRAM_BYTES;
        let ngram_bytes = self.block.len();
        let quant_bytes = self.quant.memory_usage();
        TrieStats {
            unigram_bytes,
            ngram_bytes,
            quant_bytes,
            total_bytes: unigram_bytes + ngram_bytes + quant_bytes,
        }
    }
}
