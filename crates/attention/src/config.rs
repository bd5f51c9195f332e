//! Configuration shared by both attention variants.

use candle_core::Result;

use crate::error::AttentionError;

/// Hyperparameters driving a self-attention block.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionConfig {
    pub hidden_size: usize,
    pub num_attention_heads: usize,
    /// Dropout applied to the attention probabilities during training.
    pub attention_probs_dropout_prob: f32,
    /// Dropout applied to the projected output during training.
    pub hidden_dropout_prob: f32,
    pub layer_norm_eps: f64,
    pub initializer_range: f64,
}

impl AttentionConfig {
    /// Per-head dimension; only meaningful after [`validate`](Self::validate).
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Checks the structural invariants once, at construction time.
    pub fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 || self.num_attention_heads == 0 {
            return Err(AttentionError::InvalidConfig {
                context: "hidden_size and num_attention_heads must be non-zero".to_string(),
            }
            .into());
        }
        if self.hidden_size % self.num_attention_heads != 0 {
            return Err(AttentionError::InvalidConfig {
                context: format!(
                    "the hidden size ({}) is not a multiple of the number of attention heads ({})",
                    self.hidden_size, self.num_attention_heads
                ),
            }
            .into());
        }
        Ok(())
    }
}
