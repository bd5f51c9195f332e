//! Relative-position self-attention.
//!
//! On top of the standard content-content scores, every query also attends to
//! a position-bias vector per (from, to) token pair, and the attention
//! weights aggregate those bias vectors into the value path. The bias table
//! is a fixed sinusoid of the clipped pairwise distance, built once at
//! construction; gradients never flow through it.

use candle_core::{Result, Tensor};
use candle_nn::ops::softmax_last_dim;
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};
use embedding::relative_position_table;
use layers::{checks, init};

use crate::config::AttentionConfig;
use crate::error::AttentionError;
use crate::standard::{merge_heads, split_heads};

/// Multi-head self-attention with sinusoidal relative-position biases.
#[derive(Debug)]
pub struct RelativeSelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    layer_norm: LayerNorm,
    attention_dropout: Dropout,
    output_dropout: Dropout,
    relative_positions: Tensor,
    max_length: usize,
    num_heads: usize,
    head_dim: usize,
    hidden_size: usize,
    scale: f64,
}

impl RelativeSelfAttention {
    /// Builds the block with the standard sinusoidal table covering
    /// `max_length` positions.
    pub fn new(
        config: &AttentionConfig,
        max_length: usize,
        max_relative_position: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let table = relative_position_table(
            max_length,
            config.head_dim(),
            max_relative_position,
            vb.device(),
        )?;
        log::debug!(
            "built relative-position table: length={max_length} depth={} max_relative_position={max_relative_position}",
            config.head_dim()
        );
        Self::with_position_table(config, table, vb)
    }

    /// Builds the block around a caller-supplied `(length, length, head_dim)`
    /// position table.
    pub fn with_position_table(
        config: &AttentionConfig,
        relative_positions: Tensor,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let (max_length, to_length, depth) = relative_positions.dims3()?;
        if max_length != to_length || depth != config.head_dim() {
            return Err(AttentionError::InvalidConfig {
                context: format!(
                    "position table must be (length, length, {}), got {:?}",
                    config.head_dim(),
                    relative_positions.dims()
                ),
            }
            .into());
        }

        let hidden = config.hidden_size;
        let std = config.initializer_range;
        Ok(Self {
            query: init::linear(hidden, hidden, std, vb.pp("query"))?,
            key: init::linear(hidden, hidden, std, vb.pp("key"))?,
            value: init::linear(hidden, hidden, std, vb.pp("value"))?,
            dense: init::linear(hidden, hidden, std, vb.pp("dense"))?,
            layer_norm: init::layer_norm(hidden, config.layer_norm_eps, vb.pp("layer_norm"))?,
            attention_dropout: Dropout::new(config.attention_probs_dropout_prob),
            output_dropout: Dropout::new(config.hidden_dropout_prob),
            relative_positions,
            max_length,
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
            hidden_size: hidden,
            scale: 1.0 / (config.head_dim() as f64).sqrt(),
        })
    }

    /// Longest sequence the precomputed table covers.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Returns the residual-normalised hidden states and the post-mask,
    /// pre-softmax attention scores.
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (batch, seq_len) =
            checks::expect_batch_seq_hidden("attention.input", hidden_states, self.hidden_size)?;
        if seq_len > self.max_length {
            return Err(AttentionError::SequenceTooLong {
                seq_len,
                bound: self.max_length,
            }
            .into());
        }

        let query = split_heads(
            &self.query.forward(hidden_states)?,
            self.num_heads,
            self.head_dim,
        )?;
        let key = split_heads(
            &self.key.forward(hidden_states)?,
            self.num_heads,
            self.head_dim,
        )?;
        let value = split_heads(
            &self.value.forward(hidden_states)?,
            self.num_heads,
            self.head_dim,
        )?;

        // Content-content scores.
        let scores = query.matmul(&key.transpose(2, 3)?.contiguous()?)?;

        // Active window of the constant table: (seq, seq, head_dim).
        let relations = self
            .relative_positions
            .narrow(0, 0, seq_len)?
            .narrow(1, 0, seq_len)?
            .contiguous()?;

        // Content-position scores: fold batch and heads together, run a
        // batched matmul against the transposed table per query position,
        // then restore the (batch, heads, from, to) layout.
        let merged = batch * self.num_heads;
        let query_r = query
            .permute((2, 0, 1, 3))?
            .contiguous()?
            .reshape((seq_len, merged, self.head_dim))?;
        let key_position_scores = query_r.matmul(&relations.transpose(1, 2)?.contiguous()?)?;
        let key_position = key_position_scores
            .reshape((seq_len, batch, self.num_heads, seq_len))?
            .permute((1, 2, 0, 3))?
            .contiguous()?;
        let scores = scores.add(&key_position)?;

        let scores = scores.affine(self.scale, 0.0)?;
        let scores = scores.broadcast_add(attention_mask)?;

        let probs = softmax_last_dim(&scores)?;
        let probs = self.attention_dropout.forward(&probs, train)?;

        // Content-value aggregation.
        let context = probs.matmul(&value)?;

        // Position-value aggregation mirrors the content-position path with
        // the attention weights in place of the queries.
        let probs_r = probs
            .permute((2, 0, 1, 3))?
            .contiguous()?
            .reshape((seq_len, merged, seq_len))?;
        let value_position_scores = probs_r.matmul(&relations)?;
        let value_position = value_position_scores
            .reshape((seq_len, batch, self.num_heads, self.head_dim))?
            .permute((1, 2, 0, 3))?
            .contiguous()?;
        let context = context.add(&value_position)?;

        let merged_context = merge_heads(&context, self.hidden_size)?;
        let projected = self.dense.forward(&merged_context)?;
        let projected = self.output_dropout.forward(&projected, train)?;
        let output = self.layer_norm.forward(&hidden_states.add(&projected)?)?;
        Ok((output, scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn test_config(hidden_size: usize, num_heads: usize) -> AttentionConfig {
        AttentionConfig {
            hidden_size,
            num_attention_heads: num_heads,
            attention_probs_dropout_prob: 0.0,
            hidden_dropout_prob: 0.0,
            layer_norm_eps: 1e-12,
            initializer_range: 0.02,
        }
    }

    #[test]
    fn sequences_beyond_the_table_are_rejected() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attention = RelativeSelfAttention::new(&test_config(8, 2), 4, 2, vb.pp("attn"))?;

        let hidden = Tensor::randn(0f32, 1.0, (1, 5, 8), &device)?;
        let mask = Tensor::zeros((1, 1, 1, 5), DType::F32, &device)?;
        let err = attention.forward(&hidden, &mask, false).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
        Ok(())
    }

    #[test]
    fn mismatched_table_depth_is_rejected() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let table = Tensor::zeros((4, 4, 7), DType::F32, &device)?;
        let result = RelativeSelfAttention::with_position_table(&test_config(8, 2), table, vb);
        assert!(result.is_err());
        Ok(())
    }
}
