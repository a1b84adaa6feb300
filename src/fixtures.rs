//! Small order-3 model shared by unit tests.

use crate::builder::RawNgram;
use crate::layout::Unigram;
use crate::quant::QuantType;
use crate::trie::NgramTrie;
use crate::WordId;

pub const BOS: WordId = 0;
pub const THE: WordId = 1;
pub const CAT: WordId = 2;
pub const SAT: WordId = 3;
pub const EOS: WordId = 4;

pub const WORDS: [&str; 5] = ["<s>", "the", "cat", "sat", "</s>"];

pub fn unigrams() -> Vec<Unigram> {
    vec![
        Unigram::new(-99.0, -0.4),
        Unigram::new(-1.0, -0.1),
        Unigram::new(-1.2, -0.25),
        Unigram::new(-1.5, -0.3),
        Unigram::new(-0.8, 0.0),
    ]
}

/// Bigram and trigram streams, already in canonical order.
pub fn streams() -> Vec<Vec<RawNgram>> {
    let bigrams = vec![
        RawNgram::from_text_order(&[BOS, THE], -0.2, -0.2),
        RawNgram::from_text_order(&[THE, CAT], -0.3, -0.15),
        RawNgram::from_text_order(&[THE, SAT], -0.7, -0.05),
        RawNgram::from_text_order(&[CAT, SAT], -0.6, -0.35),
        RawNgram::from_text_order(&[SAT, EOS], -0.4, 0.0),
    ];
    let trigrams = vec![
        RawNgram::from_text_order(&[BOS, THE, SAT], -0.1, 0.0),
        RawNgram::from_text_order(&[THE, CAT, SAT], -0.25, 0.0),
    ];
    vec![bigrams, trigrams]
}

pub fn counts() -> Vec<u64> {
    vec![5, 5, 2]
}

pub fn trie(quant: QuantType) -> NgramTrie {
    NgramTrie::build(quant, &counts(), unigrams(), streams()).unwrap()
}
