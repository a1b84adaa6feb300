//! # ngram-trie
//!
//! A compact, read-only n-gram language model stored as a bit-packed trie.
//!
//! Every n-gram of order 2 and up is one fixed-width record of a sorted
//! table: the word id, its quantized weights and, for non-final orders, the
//! index where its children start in the next table. Lookups descend the
//! trie with interpolation search inside each context's child range, and
//! scoring applies Katz-style backoff over the longest match.
//!
//! ## Architecture
//!
//! 1. **Bits** ([`bits`]): unaligned fixed-width fields in a byte buffer.
//! 2. **Quantizer** ([`quant`]): 16-bit histogram codes or raw floats.
//! 3. **Layout** ([`layout`]): unigram array plus one block of middle tables
//!    and the longest table, sized exactly from the per-order counts.
//! 4. **Builder** ([`builder`]): single k-way merge over sorted streams.
//! 5. **Query** ([`query`]): interpolation search and backoff scoring.
//!
//! ## Example
//!
//! ```rust
//! use ngram_trie::{NgramTrie, QuantType, RawNgram, Unigram};
//!
//! // <s>=0 the=1 cat=2
//! let unigrams = vec![
//!     Unigram::new(-99.0, -0.5),
//!     Unigram::new(-1.0, -0.2),
//!     Unigram::new(-1.5, 0.0),
//! ];
//! let bigrams = vec![
//!     RawNgram::from_text_order(&[0, 1], -0.3, 0.0),
//!     RawNgram::from_text_order(&[1, 2], -0.4, 0.0),
//! ];
//! let trie = NgramTrie::build(QuantType::NoQuant, &[3, 2], unigrams, vec![bigrams]).unwrap();
//!
//! // P(cat | the)
//! let score = trie.score(2, &[1]);
//! assert_eq!(score.n_used, 2);
//! assert_eq!(score.log_prob, -0.4);
//!
//! // Unseen bigram: backs off to the unigram.
//! let score = trie.score(2, &[0]);
//! assert_eq!(score.n_used, 1);
//! assert_eq!(score.log_prob, -1.5 + -0.5);
//! ```

#![deny(unsafe_op_in_unsafe_fn)]

pub mod bits;
pub mod builder;
pub mod config;
pub mod error;
pub mod io;
pub mod layout;
pub mod model;
pub mod quant;
pub mod query;
pub mod storage;
pub mod trie;

pub use builder::{sort_ngrams, RawNgram};
pub use config::{ModelConfig, ScoreWeights};
pub use error::{Result, TrieError};
pub use io::WordStrings;
pub use layout::{NodeRange, Unigram};
pub use model::{NgramModel, SharedModel};
pub use quant::QuantType;
pub use query::Score;
pub use trie::{NgramTrie, TrieStats};

/// Vocabulary index of a word.
pub type WordId = u32;

/// Highest supported n-gram order.
pub const MAX_ORDER: usize = 5;

#[cfg(test)]
mod fixtures;

#[cfg(test)]
mod proptests;
