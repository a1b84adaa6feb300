//! Single-pass trie construction.
//!
//! Per-order record streams are merged through a priority queue together with
//! one "tick" per unigram. Records come out in canonical order (reversed
//! words, lexicographic, a prefix before its extensions), so every parent is
//! written before its children and its `next` field can be taken from the
//! child table's current insertion index.
//!
//! Records whose context was pruned from the input get a blank context record
//! inserted on the fly. [`fix_counts`] runs the same merge without writing to
//! size the tables for those extra records.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use smallvec::{smallvec, SmallVec};
use tracing::{info, warn};

use crate::bits;
use crate::error::Result;
use crate::layout::{TrieLayout, Unigram};
use crate::quant::{QuantType, Quantizer};
use crate::{WordId, MAX_ORDER};

/// Word tuple of one n-gram, most recent word first.
pub type Words = SmallVec<[WordId; MAX_ORDER]>;

/// One input n-gram with its pre-computed weights.
///
/// `words[0]` is the predicted word and `words[k - 1]` the oldest context
/// word. `backoff` is ignored for the longest order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNgram {
    pub words: Words,
    pub prob: f32,
    pub backoff: f32,
}

impl RawNgram {
    /// Build from words already in trie order (most recent first).
    pub fn new(words: &[WordId], prob: f32, backoff: f32) -> Self {
        Self {
            words: Words::from_slice(words),
            prob,
            backoff,
        }
    }

    /// Build from words in text order (most recent last), as an ARPA line
    /// lists them.
    pub fn from_text_order(words: &[WordId], prob: f32, backoff: f32) -> Self {
        Self {
            words: words.iter().rev().copied().collect(),
            prob,
            backoff,
        }
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.words.len()
    }

    /// Words in text order (most recent last).
    pub fn text_order(&self) -> Words {
        self.words.iter().rev().copied().collect()
    }
}

/// Canonical comparator for n-grams of `order`.
pub fn ngram_cmp(order: usize) -> impl Fn(&RawNgram, &RawNgram) -> Ordering {
    move |a, b| a.words[..order].cmp(&b.words[..order])
}

/// Sort a stream of n-grams of `order` into canonical order.
pub fn sort_ngrams(order: usize, ngrams: &mut [RawNgram]) {
    let cmp = ngram_cmp(order);
    ngrams.sort_unstable_by(|a, b| cmp(a, b));
}

// =============================================================================
// Merge
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
struct Cursor {
    key: Words,
    order: usize,
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // Keys of different orders never compare equal (lengths differ), and
        // a shorter key sorts before any key it prefixes.
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Receives the merged event stream.
trait MergeSink {
    fn unigram(&mut self, word: WordId);
    /// A missing context of `order` (`path` holds its words) must be created.
    fn blank(&mut self, order: usize, path: &[WordId]);
    fn ngram(&mut self, order: usize, gram: &RawNgram);
}

fn merge<S: MergeSink>(vocab: u64, streams: &[Vec<RawNgram>], sink: &mut S) {
    let mut queue = BinaryHeap::with_capacity(streams.len() + 1);
    queue.push(Reverse(Cursor {
        key: smallvec![0],
        order: 1,
    }));
    let mut positions: SmallVec<[usize; MAX_ORDER]> = smallvec![0; streams.len()];
    for (i, stream) in streams.iter().enumerate() {
        if let Some(first) = stream.first() {
            queue.push(Reverse(Cursor {
                key: first.words.clone(),
                order: i + 2,
            }));
        }
    }

    // Words of the most recently written record at each depth.
    let mut path: Words = SmallVec::new();
    let mut unigram: u64 = 0;
    let mut finished = false;

    while let Some(Reverse(top)) = queue.pop() {
        if top.order == 1 {
            let word = unigram as WordId;
            sink.unigram(word);
            path.clear();
            path.push(word);
            unigram += 1;
            if unigram == vocab + 1 {
                finished = true;
                break;
            }
            queue.push(Reverse(Cursor {
                key: smallvec![unigram as WordId],
                order: 1,
            }));
            continue;
        }

        let k = top.order;
        let stream = &streams[k - 2];
        let gram = &stream[positions[k - 2]];

        let diverge = (0..k - 1)
            .find(|&i| path.get(i) != Some(&gram.words[i]))
            .unwrap_or(k - 1);
        debug_assert!(diverge > 0, "unigram tick must precede its n-grams");
        if diverge < k - 1 {
            path.truncate(diverge);
            for j in diverge..k - 1 {
                path.push(gram.words[j]);
                sink.blank(j + 1, &path);
            }
        }
        path.truncate(k - 1);
        path.push(gram.words[k - 1]);
        sink.ngram(k, gram);

        positions[k - 2] += 1;
        if let Some(next) = stream.get(positions[k - 2]) {
            queue.push(Reverse(Cursor {
                key: next.words.clone(),
                order: k,
            }));
        }
    }

    assert!(
        finished && queue.is_empty(),
        "n-gram streams were not exhausted by the merge: input is unsorted or inconsistent"
    );
}

struct CountSink {
    counts: Vec<u64>,
}

impl MergeSink for CountSink {
    fn unigram(&mut self, _word: WordId) {}

    fn blank(&mut self, order: usize, _path: &[WordId]) {
        self.counts[order - 1] += 1;
    }

    fn ngram(&mut self, _order: usize, _gram: &RawNgram) {}
}

/// Counts after adding one blank record for every missing context.
pub fn fix_counts(counts: &[u64], streams: &[Vec<RawNgram>]) -> Vec<u64> {
    let mut sink = CountSink {
        counts: counts.to_vec(),
    };
    merge(counts[0], streams, &mut sink);
    sink.counts
}

struct BuildSink<'a> {
    order: usize,
    layout: &'a mut TrieLayout,
    block: &'a mut [u8],
    unigrams: &'a mut [Unigram],
    quant: &'a Quantizer,
    /// Probability of the record at each depth of the current path.
    probs: SmallVec<[f32; MAX_ORDER]>,
}

impl MergeSink for BuildSink<'_> {
    fn unigram(&mut self, word: WordId) {
        let next = if self.order == 2 {
            self.layout.longest.base.insert_index
        } else {
            self.layout.middles[0].base.insert_index
        };
        let entry = &mut self.unigrams[word as usize];
        entry.next = next;
        self.probs.clear();
        self.probs.push(entry.prob);
    }

    fn blank(&mut self, order: usize, path: &[WordId]) {
        let depth = order - 1;
        let word = path[depth];
        let prob = (self.probs[depth - 1] + self.unigrams[word as usize].backoff).min(0.0);
        self.probs.truncate(depth);
        self.probs.push(prob);
        self.write_middle(order, word, prob, 0.0);
    }

    fn ngram(&mut self, order: usize, gram: &RawNgram) {
        let word = gram.words[order - 1];
        self.probs.truncate(order - 1);
        self.probs.push(gram.prob);
        if order == self.order {
            let bit = self.layout.longest.insert(self.block, word);
            let table = self.layout.longest.base.bytes_mut(self.block);
            self.quant.write_longest(table, bit, gram.prob);
        } else {
            self.write_middle(order, word, gram.prob, gram.backoff);
        }
    }
}

impl BuildSink<'_> {
    fn write_middle(&mut self, order: usize, word: WordId, prob: f32, backoff: f32) {
        let idx = order - 2;
        let next = self.layout.insert_index(self.layout.middles[idx].next_source);
        let middle = &mut self.layout.middles[idx];
        let bit = middle.insert(self.block, word, next);
        let table = middle.base.bytes_mut(self.block);
        self.quant.write_middle(table, bit, idx, prob, backoff);
    }
}

// =============================================================================
// Entry point
// =============================================================================

/// Everything a finished build produces.
pub struct BuiltTables {
    /// Counts including blank records; these size the tables.
    pub counts: Vec<u64>,
    /// `counts[0] + 1` entries, the last one a sentinel.
    pub unigrams: Vec<Unigram>,
    pub layout: TrieLayout,
    pub block: Vec<u8>,
    pub quant: Quantizer,
}

fn clamp_positive(what: &str, probs: impl Iterator<Item = f32>) -> usize {
    let clamped = probs.filter(|&p| p > 0.0).count();
    if clamped > 0 {
        warn!(clamped, "{what} with positive probability set to 0");
    }
    clamped
}

/// Build all tables from unigram weights and per-order n-gram streams.
///
/// `counts[0]` must equal `unigrams.len()` and `counts[k - 1]` the length of
/// the order-k stream (`streams[k - 2]`). Each stream must be sorted with
/// [`sort_ngrams`] and free of duplicates.
///
/// # Errors
/// Returns an error for an unsupported order, an empty vocabulary, or a
/// failed bit-packing self-test.
///
/// # Panics
/// Panics when the input breaks the contract above; a trie built from such
/// input would silently return wrong scores.
pub fn build(
    quant_type: QuantType,
    counts: &[u64],
    mut unigrams: Vec<Unigram>,
    mut streams: Vec<Vec<RawNgram>>,
) -> Result<BuiltTables> {
    bits::sanity_check()?;
    let order = counts.len();
    let mut quant = Quantizer::new(quant_type, order)?;
    // Validates vocabulary and order before any input is inspected.
    TrieLayout::new(counts, quant_type)?;

    let vocab = counts[0];
    assert_eq!(
        unigrams.len() as u64,
        vocab,
        "unigram count does not match counts[0]"
    );
    assert_eq!(streams.len(), order - 1, "one stream per order 2..=N required");
    for (i, stream) in streams.iter().enumerate() {
        let k = i + 2;
        assert_eq!(
            stream.len() as u64,
            counts[k - 1],
            "{k}-gram stream length does not match its count"
        );
        for gram in stream {
            assert_eq!(gram.order(), k, "{k}-gram stream holds a {}-gram", gram.order());
            assert!(
                gram.words.iter().all(|&w| u64::from(w) < vocab),
                "{k}-gram {:?} references a word outside the vocabulary",
                gram.words
            );
        }
        assert!(
            stream.windows(2).all(|w| w[0].words < w[1].words),
            "{k}-gram stream is not strictly sorted"
        );
    }

    clamp_positive("unigrams", unigrams.iter().map(|u| u.prob));
    for u in &mut unigrams {
        u.prob = u.prob.min(0.0);
    }
    for (i, stream) in streams.iter_mut().enumerate() {
        let what = format!("{}-grams", i + 2);
        clamp_positive(&what, stream.iter().map(|g| g.prob));
        for gram in stream.iter_mut() {
            gram.prob = gram.prob.min(0.0);
        }
    }

    if quant.needs_training() {
        info!("training quantizer");
        for (i, stream) in streams.iter().enumerate().take(order - 2) {
            let mut probs: Vec<f32> = stream.iter().map(|g| g.prob).collect();
            let mut backoffs: Vec<f32> = stream.iter().map(|g| g.backoff).collect();
            quant.train(i + 2, &mut probs, &mut backoffs);
        }
        let mut probs: Vec<f32> = streams[order - 2].iter().map(|g| g.prob).collect();
        quant.train_prob(&mut probs);
    }

    let fixed = fix_counts(counts, &streams);
    let blanks: u64 = fixed.iter().zip(counts).map(|(f, c)| f - c).sum();
    if blanks > 0 {
        info!(blanks, "inserting blank contexts for pruned n-grams");
    }

    let mut layout = TrieLayout::new(&fixed, quant_type)?;
    let mut block = vec![0u8; layout.block_size];
    unigrams.push(Unigram::default());

    info!(order, bytes = layout.block_size, "building trie");
    {
        let mut sink = BuildSink {
            order,
            layout: &mut layout,
            block: &mut block,
            unigrams: &mut unigrams,
            quant: &quant,
            probs: SmallVec::new(),
        };
        merge(vocab, &streams, &mut sink);
    }

    // Close the child range of each middle table's last record.
    for i in 0..layout.middles.len() {
        let next_end = layout.insert_index(layout.middles[i].next_source);
        layout.middles[i].finish_loading(&mut block, next_end);
    }

    for (i, middle) in layout.middles.iter().enumerate() {
        assert_eq!(middle.base.insert_index, fixed[i + 1], "middle table underfilled");
    }
    assert_eq!(
        layout.longest.base.insert_index,
        fixed[order - 1],
        "longest table underfilled"
    );

    Ok(BuiltTables {
        counts: fixed,
        unigrams,
        layout,
        block,
        quant,
    })
}
