//! Model configuration.

use crate::quant::QuantType;

/// Configuration for building and scoring an [`NgramModel`](crate::NgramModel).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    /// Weight encoding used when building; loaded files carry their own.
    pub quant: QuantType,
    /// Multiplier applied to every raw log-probability
    pub language_weight: f32,
    /// Word insertion penalty, added to every score as its natural log
    pub word_insertion_penalty: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            quant: QuantType::Quant16,
            language_weight: 1.0,
            word_insertion_penalty: 1.0,
        }
    }
}

impl ModelConfig {
    pub fn weights(&self) -> ScoreWeights {
        ScoreWeights {
            language_weight: self.language_weight,
            log_wip: self.word_insertion_penalty.ln(),
        }
    }
}

/// Affine transform from raw to weighted scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub language_weight: f32,
    pub log_wip: f32,
}

impl ScoreWeights {
    #[inline]
    pub fn apply(&self, raw: f32) -> f32 {
        raw * self.language_weight + self.log_wip
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        ModelConfig::default().weights()
    }
}
