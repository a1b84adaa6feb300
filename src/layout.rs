//! Memory layout of the trie tables.
//!
//! A trie of order N is one unigram array plus one contiguous byte block that
//! holds N-2 middle tables followed by the longest table:
//!
//! ```text
//! unigrams: [prob:f32][backoff:f32][next:u64] x (vocab + 1)
//! block:    [middle order 2][middle order 3]...[longest order N]
//! middle:   [word:word_bits][weights:quant_bits][next:next_bits] x (count + 1)
//! longest:  [word:word_bits][prob:quant_bits] x (count + 1)
//! ```
//!
//! Records are bit-packed back to back. The extra trailing record of every
//! table is a sentinel: for middle tables its `next` field closes the child
//! range of the last real record. Each table also carries 8 bytes of padding
//! so 64-bit windows never read past the block.

use crate::bits::{read_bits, required_bits, write_bits, BitMask, MAX_INT_BITS};
use crate::error::{Result, TrieError};
use crate::quant::QuantType;
use crate::WordId;

/// Serialized size of one [`Unigram`].
pub const UNIGRAM_BYTES: usize = 16;

/// Per-word entry of the unigram array.
///
/// `next` is where this word's children start in the order-2 table; the next
/// entry's `next` is where they end.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Unigram {
    pub prob: f32,
    pub backoff: f32,
    pub next: u64,
}

impl Unigram {
    pub fn new(prob: f32, backoff: f32) -> Self {
        Self {
            prob,
            backoff,
            next: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; UNIGRAM_BYTES] {
        let mut out = [0u8; UNIGRAM_BYTES];
        out[0..4].copy_from_slice(&self.prob.to_le_bytes());
        out[4..8].copy_from_slice(&self.backoff.to_le_bytes());
        out[8..16].copy_from_slice(&self.next.to_le_bytes());
        out
    }

    pub fn from_bytes(b: &[u8]) -> Self {
        let f = |at: usize| f32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);
        let mut next = [0u8; 8];
        next.copy_from_slice(&b[8..16]);
        Self {
            prob: f(0),
            backoff: f(4),
            next: u64::from_le_bytes(next),
        }
    }
}

/// Half-open index range `[begin, end)` of one context's children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeRange {
    pub begin: u64,
    pub end: u64,
}

impl NodeRange {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.begin
    }
}

// =============================================================================
// Sizing
// =============================================================================

fn base_size(entries: u64, max_vocab: u64, remaining_bits: u8) -> Option<u64> {
    let total_bits = u64::from(required_bits(max_vocab)) + u64::from(remaining_bits);
    let bits = entries.checked_add(1)?.checked_mul(total_bits)?;
    bits.div_ceil(8).checked_add(8)
}

/// Bytes of a middle table with `entries` records whose `next` indexes a
/// table of `max_next` records. `None` if the size overflows.
pub fn middle_size(quant_bits: u8, entries: u64, max_vocab: u64, max_next: u64) -> Option<u64> {
    base_size(entries, max_vocab, quant_bits + required_bits(max_next))
}

pub fn longest_size(quant_bits: u8, entries: u64, max_vocab: u64) -> Option<u64> {
    base_size(entries, max_vocab, quant_bits)
}

fn table_bytes(order: usize, entries: u64, size: Option<u64>) -> Result<usize> {
    size.and_then(|s| usize::try_from(s).ok())
        .ok_or(TrieError::TableTooLarge { order, entries })
}

// =============================================================================
// Tables
// =============================================================================

/// Fields shared by middle and longest tables.
#[derive(Debug, Clone)]
pub struct BaseTable {
    pub word_bits: u8,
    pub word_mask: u64,
    pub total_bits: u8,
    /// Byte offset of the table inside the n-gram block.
    pub offset: usize,
    pub size: usize,
    /// Next record slot to fill while building; equals the record count after.
    pub insert_index: u64,
    pub max_vocab: u64,
}

impl BaseTable {
    fn new(offset: usize, size: usize, max_vocab: u64, remaining_bits: u8) -> Self {
        let word = BitMask::from_max(max_vocab);
        Self {
            word_bits: word.bits,
            word_mask: word.mask,
            total_bits: word.bits + remaining_bits,
            offset,
            size,
            insert_index: 0,
            max_vocab,
        }
    }

    #[inline]
    pub fn bytes<'a>(&self, block: &'a [u8]) -> &'a [u8] {
        &block[self.offset..self.offset + self.size]
    }

    #[inline]
    pub fn bytes_mut<'a>(&self, block: &'a mut [u8]) -> &'a mut [u8] {
        &mut block[self.offset..self.offset + self.size]
    }

    #[inline]
    pub fn record_bit(&self, index: u64) -> u64 {
        index * u64::from(self.total_bits)
    }

    #[inline]
    pub fn word_at(&self, table: &[u8], index: u64) -> WordId {
        read_bits(table, self.record_bit(index), self.word_bits, self.word_mask) as WordId
    }

    /// Append a record's word; returns the bit offset of its weights.
    fn insert_word(&mut self, table: &mut [u8], word: WordId) -> u64 {
        assert!(
            u64::from(word) <= self.word_mask,
            "word id {word} does not fit in {} bits",
            self.word_bits
        );
        let at = self.record_bit(self.insert_index);
        write_bits(table, at, self.word_bits, u64::from(word));
        self.insert_index += 1;
        at + u64::from(self.word_bits)
    }
}

/// The table a middle record's `next` field points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextTable {
    /// Middle table at this index (`order - 2`).
    Middle(usize),
    Longest,
}

#[derive(Debug, Clone)]
pub struct MiddleTable {
    pub base: BaseTable,
    pub next_mask: BitMask,
    pub quant_bits: u8,
    pub next_source: NextTable,
}

impl MiddleTable {
    /// Append a record with `word` and child start `next`; returns the bit
    /// offset of its weights field.
    pub fn insert(&mut self, block: &mut [u8], word: WordId, next: u64) -> u64 {
        let table = self.base.bytes_mut(block);
        let weights = self.base.insert_word(table, word);
        write_bits(
            table,
            weights + u64::from(self.quant_bits),
            self.next_mask.bits,
            next,
        );
        weights
    }

    /// Write the sentinel `next` that closes the last record's child range.
    pub fn finish_loading(&self, block: &mut [u8], next_end: u64) {
        let at = self.base.record_bit(self.base.insert_index + 1) - u64::from(self.next_mask.bits);
        write_bits(self.base.bytes_mut(block), at, self.next_mask.bits, next_end);
    }

    #[inline]
    pub fn next_at(&self, table: &[u8], index: u64) -> u64 {
        let at = self.base.record_bit(index)
            + u64::from(self.base.word_bits)
            + u64::from(self.quant_bits);
        read_bits(table, at, self.next_mask.bits, self.next_mask.mask)
    }

    /// Child range of the record at `index`.
    #[inline]
    pub fn children(&self, table: &[u8], index: u64) -> NodeRange {
        NodeRange {
            begin: self.next_at(table, index),
            end: self.next_at(table, index + 1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LongestTable {
    pub base: BaseTable,
    pub quant_bits: u8,
}

impl LongestTable {
    pub fn insert(&mut self, block: &mut [u8], word: WordId) -> u64 {
        let table = self.base.bytes_mut(block);
        self.base.insert_word(table, word)
    }
}

// =============================================================================
// Whole layout
// =============================================================================

/// All n-gram tables of one trie, carved out of a single block.
#[derive(Debug, Clone)]
pub struct TrieLayout {
    pub middles: Vec<MiddleTable>,
    pub longest: LongestTable,
    pub block_size: usize,
}

impl TrieLayout {
    /// Size every table from `counts` (`counts[0]` is the vocabulary size).
    pub fn new(counts: &[u64], quant: QuantType) -> Result<Self> {
        let order = counts.len();
        if !(2..=crate::MAX_ORDER).contains(&order) {
            return Err(TrieError::InvalidOrder(order));
        }
        let vocab = counts[0];
        if vocab == 0 {
            return Err(TrieError::EmptyVocabulary);
        }
        // The sentinel unigram's id must fit a WordId too.
        if vocab > u64::from(WordId::MAX) {
            return Err(TrieError::VocabularyTooLarge {
                bits: required_bits(vocab),
            });
        }

        let middle_bits = quant.middle_bits();
        let longest_bits = quant.longest_bits();
        let mut offset = 0usize;
        let mut middles = Vec::with_capacity(order - 2);
        for i in 2..order {
            let entries = counts[i - 1];
            let max_next = counts[i];
            let next_mask = BitMask::from_max(max_next);
            if next_mask.bits > MAX_INT_BITS {
                return Err(TrieError::TableTooLarge {
                    order: i + 1,
                    entries: max_next,
                });
            }
            let size = table_bytes(i, entries, middle_size(middle_bits, entries, vocab, max_next))?;
            let next_source = if i == order - 1 {
                NextTable::Longest
            } else {
                NextTable::Middle(i - 1)
            };
            tracing::debug!(order = i, entries, bytes = size, "middle table");
            middles.push(MiddleTable {
                base: BaseTable::new(offset, size, vocab, middle_bits + next_mask.bits),
                next_mask,
                quant_bits: middle_bits,
                next_source,
            });
            offset = offset
                .checked_add(size)
                .ok_or(TrieError::TableTooLarge { order: i, entries })?;
        }

        let entries = counts[order - 1];
        let size = table_bytes(order, entries, longest_size(longest_bits, entries, vocab))?;
        tracing::debug!(order, entries, bytes = size, "longest table");
        let longest = LongestTable {
            base: BaseTable::new(offset, size, vocab, longest_bits),
            quant_bits: longest_bits,
        };
        let block_size = offset
            .checked_add(size)
            .ok_or(TrieError::TableTooLarge { order, entries })?;
        Ok(Self {
            middles,
            longest,
            block_size,
        })
    }

    /// Current insertion index of the table `source` refers to.
    pub fn insert_index(&self, source: NextTable) -> u64 {
        match source {
            NextTable::Middle(i) => self.middles[i].base.insert_index,
            NextTable::Longest => self.longest.base.insert_index,
        }
    }

    /// Mark every table as fully populated, as after loading from disk.
    pub(crate) fn mark_loaded(&mut self, counts: &[u64]) {
        for (i, middle) in self.middles.iter_mut().enumerate() {
            middle.base.insert_index = counts[i + 1];
        }
        self.longest.base.insert_index = counts[counts.len() - 1];
    }

    /// Check every middle table's `next` fields: non-decreasing, starting at
    /// 0 and ending exactly at the size of the table they point into.
    pub(crate) fn check_next_pointers(&self, block: &[u8], counts: &[u64]) -> Result<()> {
        for (i, middle) in self.middles.iter().enumerate() {
            let table = middle.base.bytes(block);
            let mut prev = 0;
            for index in 0..=counts[i + 1] {
                let next = middle.next_at(table, index);
                if next < prev || (index == 0 && next != 0) {
                    return Err(TrieError::Corrupt("middle table child pointers are not monotonic"));
                }
                prev = next;
            }
            if prev != counts[i + 2] {
                return Err(TrieError::Corrupt("middle table child pointers do not close their range"));
            }
        }
        Ok(())
    }
}
