//! Lookup and backoff scoring over a built trie.
//!
//! Every table stores the words of one context's children sorted ascending,
//! so a child is found by interpolation search between the context's range
//! bounds. Scoring walks the history from the most recent word outward,
//! keeping the longest match, then adds the backoff weights of the context
//! that failed to extend.

use std::cmp::Ordering;

use crate::bits::read_bits;
use crate::builder::{RawNgram, Words};
use crate::layout::{BaseTable, LongestTable, MiddleTable, NodeRange};
use crate::trie::NgramTrie;
use crate::WordId;

/// A known `(index, key)` pair bounding an interpolation search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub index: u64,
    pub key: u64,
}

/// Interpolation search for `key` strictly between `before` and `after`.
///
/// Records are `total_bits` wide and sorted ascending by their leading
/// `key_bits`-bit key. `before.index` may be `u64::MAX` to stand for the
/// position just before index 0. Requires `before.key <= key <= after.key`.
/// Returns the matching record index.
pub fn interpolation_find(
    table: &[u8],
    total_bits: u8,
    key_bits: u8,
    key_mask: u64,
    mut before: Bound,
    mut after: Bound,
    key: u64,
) -> Option<u64> {
    debug_assert!(before.key <= key && key <= after.key);
    while after.index.wrapping_sub(before.index) > 1 {
        let width = after.index.wrapping_sub(before.index) - 1;
        let offset = u128::from(key - before.key);
        let span = u128::from(after.key - before.key) + 1;
        let step = (offset * u128::from(width) / span) as u64;
        let pivot = before.index.wrapping_add(1 + step);
        let mid = read_bits(table, pivot * u64::from(total_bits), key_bits, key_mask);
        match mid.cmp(&key) {
            Ordering::Less => before = Bound { index: pivot, key: mid },
            Ordering::Greater => after = Bound { index: pivot, key: mid },
            Ordering::Equal => return Some(pivot),
        }
    }
    None
}

/// A found record: its table's bytes and the bit offset of its weights.
#[derive(Debug, Clone, Copy)]
pub struct Found<'a> {
    pub table: &'a [u8],
    pub bit: u64,
}

impl BaseTable {
    /// Index of the record holding `word` within `range`.
    #[inline]
    fn find_index(&self, table: &[u8], word: WordId, range: NodeRange) -> Option<u64> {
        let key = u64::from(word);
        if key > self.max_vocab {
            return None;
        }
        interpolation_find(
            table,
            self.total_bits,
            self.word_bits,
            self.word_mask,
            Bound {
                index: range.begin.wrapping_sub(1),
                key: 0,
            },
            Bound {
                index: range.end,
                key: self.max_vocab,
            },
            key,
        )
    }
}

impl MiddleTable {
    /// Find `word` among the children in `range` and narrow `range` to that
    /// record's own children. `range` is untouched on a miss.
    pub fn find<'a>(&self, block: &'a [u8], word: WordId, range: &mut NodeRange) -> Option<Found<'a>> {
        let table = self.base.bytes(block);
        let index = self.base.find_index(table, word, *range)?;
        *range = self.children(table, index);
        Some(Found {
            table,
            bit: self.base.record_bit(index) + u64::from(self.base.word_bits),
        })
    }
}

impl LongestTable {
    pub fn find<'a>(&self, block: &'a [u8], word: WordId, range: NodeRange) -> Option<Found<'a>> {
        let table = self.base.bytes(block);
        let index = self.base.find_index(table, word, range)?;
        Some(Found {
            table,
            bit: self.base.record_bit(index) + u64::from(self.base.word_bits),
        })
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Log-probability of a word and the length of the n-gram that supplied it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub log_prob: f32,
    /// Order of the longest stored n-gram ending in the scored word.
    pub n_used: usize,
}

impl NgramTrie {
    /// Backoff log-probability of `word` given `history`, most recent first.
    ///
    /// Only the first `order - 1` history words are consulted.
    ///
    /// A word that starts no stored n-gram scores as its bare unigram
    /// probability with `n_used == 1`, and the history's backoff weights are
    /// not added. This differs from the normalized ARPA estimate, which
    /// would add them.
    ///
    /// # Panics
    ///
    /// If `word` or a consulted history word is not below the vocabulary size.
    pub fn score(&self, word: WordId, history: &[WordId]) -> Score {
        self.score_with_order(self.order(), word, history)
    }

    /// Like [`NgramTrie::score`], but never uses n-grams longer than
    /// `max_order` (clamped to `1..=self.order()`).
    pub fn score_with_order(&self, max_order: usize, word: WordId, history: &[WordId]) -> Score {
        let max_order = max_order.clamp(1, self.order());
        let history = &history[..history.len().min(max_order - 1)];
        let (log_prob, n_used, independent) = self.score_except_backoff(word, history);
        if independent || history.len() < n_used {
            return Score { log_prob, n_used };
        }
        Score {
            log_prob: log_prob + self.score_backoff(n_used, history),
            n_used,
        }
    }

    /// Longest match for `word` after `history`. The flag is set when the
    /// word has no children at all, so no context can ever change its score.
    fn score_except_backoff(&self, word: WordId, history: &[WordId]) -> (f32, usize, bool) {
        let mut node = self.unigram_range(word);
        let mut prob = self.unigrams[word as usize].prob;
        if history.is_empty() || node.is_empty() {
            return (prob, 1, !history.is_empty());
        }

        let block = self.block();
        let mut n_used = 1;
        for (i, &h) in history.iter().enumerate() {
            if node.is_empty() {
                break;
            }
            let n = i + 2;
            if n == self.order() {
                if let Some(hit) = self.layout.longest.find(block, h, node) {
                    prob = self.quant.read_longest_prob(hit.table, hit.bit);
                    n_used = n;
                }
                break;
            }
            match self.layout.middles[i].find(block, h, &mut node) {
                Some(hit) => {
                    prob = self.quant.read_middle_prob(hit.table, hit.bit, i);
                    n_used = n;
                }
                None => break,
            }
        }
        (prob, n_used, false)
    }

    /// Sum of backoffs of `history[..k]` for every `k >= start` whose context
    /// is stored, stopping at the first that is not.
    fn score_backoff(&self, start: usize, history: &[WordId]) -> f32 {
        let block = self.block();
        let mut backoff = 0.0f32;
        let (mut node, start) = if start <= 1 {
            let first = history[0];
            backoff += self.unigrams[first as usize].backoff;
            (self.unigram_range(first), 2)
        } else {
            match self.context_node(&history[..start - 1]) {
                Some(node) => (node, start),
                None => return backoff,
            }
        };

        for (i, &h) in history.iter().enumerate().skip(start - 1) {
            let table = i - 1;
            match self.layout.middles[table].find(block, h, &mut node) {
                Some(hit) => backoff += self.quant.read_middle_backoff(hit.table, hit.bit, table),
                None => break,
            }
        }
        backoff
    }

    /// Child range of the context `words` (most recent first), or `None` if
    /// the context is absent or has no children.
    fn context_node(&self, words: &[WordId]) -> Option<NodeRange> {
        let block = self.block();
        let (&first, rest) = words.split_first()?;
        let mut node = self.unigram_range(first);
        if node.is_empty() {
            return None;
        }
        for (i, &w) in rest.iter().enumerate() {
            self.layout.middles[i].find(block, w, &mut node)?;
            if node.is_empty() {
                return None;
            }
        }
        Some(node)
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Every stored n-gram of `order`, in trie word order and sorted.
    ///
    /// Order 1 lists the unigrams. Blank contexts inserted while building
    /// appear like any other entry. Out-of-range orders yield nothing.
    pub fn ngrams(&self, order: usize) -> Vec<RawNgram> {
        if order == 0 || order > self.order() {
            return Vec::new();
        }
        let vocab = self.vocab_size() as WordId;
        let mut out = Vec::with_capacity(self.counts[order - 1] as usize);
        let mut path = Words::new();
        for w in 0..vocab {
            path.push(w);
            if order == 1 {
                let u = &self.unigrams[w as usize];
                out.push(RawNgram::new(&path, u.prob, u.backoff));
            } else {
                self.collect(order, self.unigram_range(w), &mut path, &mut out);
            }
            path.pop();
        }
        out
    }

    fn collect(&self, order: usize, range: NodeRange, path: &mut Words, out: &mut Vec<RawNgram>) {
        let block = self.block();
        let depth = path.len();
        if depth + 1 == order {
            if order == self.order() {
                let longest = &self.layout.longest;
                let table = longest.base.bytes(block);
                for index in range.begin..range.end {
                    path.push(longest.base.word_at(table, index));
                    let bit = longest.base.record_bit(index) + u64::from(longest.base.word_bits);
                    out.push(RawNgram::new(path, self.quant.read_longest_prob(table, bit), 0.0));
                    path.pop();
                }
            } else {
                let middle = &self.layout.middles[depth - 1];
                let table = middle.base.bytes(block);
                for index in range.begin..range.end {
                    path.push(middle.base.word_at(table, index));
                    let bit = middle.base.record_bit(index) + u64::from(middle.base.word_bits);
                    let prob = self.quant.read_middle_prob(table, bit, depth - 1);
                    let backoff = self.quant.read_middle_backoff(table, bit, depth - 1);
                    out.push(RawNgram::new(path, prob, backoff));
                    path.pop();
                }
            }
            return;
        }

        let middle = &self.layout.middles[depth - 1];
        let table = middle.base.bytes(block);
        for index in range.begin..range.end {
            path.push(middle.base.word_at(table, index));
            self.collect(order, middle.children(table, index), path, out);
            path.pop();
        }
    }
}
