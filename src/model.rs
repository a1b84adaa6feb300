//! A trie together with its vocabulary and score weights.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::info;

use crate::builder::RawNgram;
use crate::config::{ModelConfig, ScoreWeights};
use crate::error::{Result, TrieError};
use crate::io::{self, WordStrings};
use crate::layout::Unigram;
use crate::query::Score;
use crate::trie::NgramTrie;
use crate::WordId;

/// Language model ready for scoring.
#[derive(Debug)]
pub struct NgramModel {
    trie: NgramTrie,
    words: WordStrings,
    weights: ScoreWeights,
}

impl NgramModel {
    /// Build from word strings, unigram weights and sorted n-gram streams
    /// (`streams[k - 2]` holds the order-k records). Counts come from the
    /// input lengths.
    pub fn build(
        config: ModelConfig,
        words: WordStrings,
        unigrams: Vec<Unigram>,
        streams: Vec<Vec<RawNgram>>,
    ) -> Result<Self> {
        if words.len() != unigrams.len() {
            return Err(TrieError::WordCountMismatch {
                expected: unigrams.len() as u64,
                actual: words.len() as u64,
            });
        }
        let counts: Vec<u64> = std::iter::once(unigrams.len() as u64)
            .chain(streams.iter().map(|s| s.len() as u64))
            .collect();
        let trie = NgramTrie::build(config.quant, &counts, unigrams, streams)?;
        Ok(Self::from_trie(trie, words, config))
    }

    pub fn from_trie(trie: NgramTrie, words: WordStrings, config: ModelConfig) -> Self {
        Self {
            trie,
            words,
            weights: config.weights(),
        }
    }

    /// Map a model file; the n-gram block is used in place.
    pub fn open(path: impl AsRef<Path>, config: ModelConfig) -> Result<Self> {
        let (trie, words) = io::map_model(path)?;
        Ok(Self::from_trie(trie, words, config))
    }

    /// Read a model file fully into memory.
    pub fn load(path: impl AsRef<Path>, config: ModelConfig) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader, config)
    }

    pub fn read_from<R: Read>(r: &mut R, config: ModelConfig) -> Result<Self> {
        let (trie, words) = io::read_model(r)?;
        Ok(Self::from_trie(trie, words, config))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        info!(path = %path.display(), bytes = self.trie.memory_usage().total_bytes, "saved trie model");
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        io::write_model(&self.trie, &self.words, w)
    }

    pub fn trie(&self) -> &NgramTrie {
        &self.trie
    }

    pub fn words(&self) -> &WordStrings {
        &self.words
    }

    pub fn weights(&self) -> ScoreWeights {
        self.weights
    }

    pub fn set_weights(&mut self, weights: ScoreWeights) {
        self.weights = weights;
    }

    pub fn order(&self) -> usize {
        self.trie.order()
    }

    /// Weighted score of `word` after `history` (most recent first).
    ///
    /// Returns `None` if `word` is not in the vocabulary.
    pub fn score(&self, word: WordId, history: &[WordId]) -> Option<Score> {
        let raw = self.raw_score(word, history)?;
        Some(Score {
            log_prob: self.weights.apply(raw.log_prob),
            n_used: raw.n_used,
        })
    }

    /// Unweighted score. History is cut at `order - 1` words and at the first
    /// id outside the vocabulary.
    pub fn raw_score(&self, word: WordId, history: &[WordId]) -> Option<Score> {
        let vocab = self.trie.vocab_size();
        if u64::from(word) >= vocab {
            return None;
        }
        let history = &history[..history.len().min(self.order() - 1)];
        let valid = history
            .iter()
            .position(|&h| u64::from(h) >= vocab)
            .unwrap_or(history.len());
        Some(self.trie.score(word, &history[..valid]))
    }

    /// Score a word sequence by its strings; unknown words yield `None`.
    pub fn score_words(&self, word: &str, history: &[&str]) -> Option<Score> {
        let word = self.words.id_of(word)?;
        let history: Vec<WordId> = history
            .iter()
            .map_while(|h| self.words.id_of(h))
            .collect();
        self.score(word, &history)
    }
}

/// A model shared between scoring threads that can be swapped at runtime.
///
/// Scoring takes the read lock, so a reload waits for in-flight scores and
/// no score ever sees a half-replaced model.
pub struct SharedModel {
    inner: RwLock<NgramModel>,
}

impl SharedModel {
    pub fn new(model: NgramModel) -> Self {
        Self {
            inner: RwLock::new(model),
        }
    }

    pub fn score(&self, word: WordId, history: &[WordId]) -> Option<Score> {
        self.inner.read().score(word, history)
    }

    /// Borrow the current model for a batch of calls.
    pub fn read(&self) -> RwLockReadGuard<'_, NgramModel> {
        self.inner.read()
    }

    /// Replace the model, returning the previous one.
    pub fn replace(&self, model: NgramModel) -> NgramModel {
        std::mem::replace(&mut *self.inner.write(), model)
    }

    /// Open `path` and swap it in. The current model stays in place if the
    /// file cannot be loaded.
    pub fn reload(&self, path: impl AsRef<Path>, config: ModelConfig) -> Result<()> {
        let model = NgramModel::open(path, config)?;
        info!(order = model.order(), vocab = model.trie.vocab_size(), "reloaded model");
        self.replace(model);
        Ok(())
    }
}
