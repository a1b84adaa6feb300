//! Error types for building, loading and persisting tries.
//!
//! Configuration problems and damaged files surface as [`TrieError`]. Lookup
//! misses are not errors: they come back as `None` or an empty
//! [`NodeRange`](crate::layout::NodeRange).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrieError {
    #[error("unsupported quantization type {0}")]
    UnsupportedQuantization(i32),

    #[error("model order {0} is not supported (expected 2..={max})", max = crate::MAX_ORDER)]
    InvalidOrder(usize),

    #[error("vocabulary is empty")]
    EmptyVocabulary,

    #[error("vocabulary needs {bits} bits per word id, at most 32 are supported")]
    VocabularyTooLarge { bits: u8 },

    #[error("order-{order} table with {entries} entries is too large")]
    TableTooLarge { order: usize, entries: u64 },

    #[error("bit packing self-test failed: {0}")]
    BitPacking(String),

    #[error("not a trie language model (bad header)")]
    BadHeader,

    #[error("truncated {what}: expected {expected} bytes, found {actual}")]
    Truncated {
        what: &'static str,
        expected: u64,
        actual: u64,
    },

    #[error("corrupt model file: {0}")]
    Corrupt(&'static str),

    #[error("word string table holds {actual} words, header declares {expected}")]
    WordCountMismatch { expected: u64, actual: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for trie operations.
pub type Result<T> = std::result::Result<T, TrieError>;
