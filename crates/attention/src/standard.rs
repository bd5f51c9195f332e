//! Standard scaled dot-product self-attention.
//!
//! The block projects hidden states into query/key/value, computes scaled
//! dot-product scores, applies the additive mask and softmax, aggregates the
//! values, and finishes with the output projection, dropout, residual add,
//! and layer norm. It returns the normalised hidden states together with the
//! post-mask, pre-softmax scores for inspection.

use candle_core::{Result, Tensor};
use candle_nn::ops::softmax_last_dim;
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};
use layers::{checks, init};

use crate::config::AttentionConfig;

pub(crate) fn split_heads(tensor: &Tensor, num_heads: usize, head_dim: usize) -> Result<Tensor> {
    let (batch, seq, _) = tensor.dims3()?;
    tensor
        .reshape((batch, seq, num_heads, head_dim))?
        .transpose(1, 2)?
        .contiguous()
}

pub(crate) fn merge_heads(tensor: &Tensor, hidden_size: usize) -> Result<Tensor> {
    let (batch, _heads, seq, _head_dim) = tensor.dims4()?;
    tensor
        .transpose(1, 2)?
        .contiguous()?
        .reshape((batch, seq, hidden_size))
}

/// Multi-head self-attention with residual output normalisation.
#[derive(Debug)]
pub struct SelfAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    dense: Linear,
    layer_norm: LayerNorm,
    attention_dropout: Dropout,
    output_dropout: Dropout,
    num_heads: usize,
    head_dim: usize,
    hidden_size: usize,
    scale: f64,
}

impl SelfAttention {
    /// Builds the projections; fails fast on an invalid head configuration.
    pub fn new(config: &AttentionConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
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
            num_heads: config.num_attention_heads,
            head_dim: config.head_dim(),
            hidden_size: hidden,
            scale: 1.0 / (config.head_dim() as f64).sqrt(),
        })
    }

    /// Returns the residual-normalised hidden states and the post-mask,
    /// pre-softmax attention scores.
    pub fn forward(
        &self,
        hidden_states: &Tensor,
        attention_mask: &Tensor,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        checks::expect_batch_seq_hidden("attention.input", hidden_states, self.hidden_size)?;

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

        let scores = query.matmul(&key.transpose(2, 3)?.contiguous()?)?;
        let scores = scores.affine(self.scale, 0.0)?;
        let scores = scores.broadcast_add(attention_mask)?;

        let probs = softmax_last_dim(&scores)?;
        let probs = self.attention_dropout.forward(&probs, train)?;
        let context = probs.matmul(&value)?;

        let merged = merge_heads(&context, self.hidden_size)?;
        let projected = self.dense.forward(&merged)?;
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

    fn test_config() -> AttentionConfig {
        AttentionConfig {
            hidden_size: 16,
            num_attention_heads: 4,
            attention_probs_dropout_prob: 0.0,
            hidden_dropout_prob: 0.0,
            layer_norm_eps: 1e-12,
            initializer_range: 0.02,
        }
    }

    #[test]
    fn forward_preserves_shape_and_reports_scores() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attention = SelfAttention::new(&test_config(), vb.pp("attn"))?;

        let hidden = Tensor::randn(0f32, 1.0, (2, 6, 16), &device)?;
        let mask = Tensor::zeros((2, 1, 1, 6), DType::F32, &device)?;
        let (output, scores) = attention.forward(&hidden, &mask, false)?;
        assert_eq!(output.dims(), &[2, 6, 16]);
        assert_eq!(scores.dims(), &[2, 4, 6, 6]);
        Ok(())
    }

    #[test]
    fn masked_positions_receive_negligible_weight() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let attention = SelfAttention::new(&test_config(), vb.pp("attn"))?;

        // Mask out the last key position for every query.
        let mut mask_data = vec![0f32; 4];
        mask_data[3] = -10000.0;
        let mask = Tensor::from_vec(mask_data, (1, 1, 1, 4), &device)?;
        let hidden = Tensor::randn(0f32, 1.0, (1, 4, 16), &device)?;

        let (_, scores) = attention.forward(&hidden, &mask, false)?;
        let probs = softmax_last_dim(&scores)?;
        let last_column = probs.narrow(3, 3, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(last_column.iter().all(|p| *p < 1e-6));
        Ok(())
    }

    #[test]
    fn eval_mode_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let mut config = test_config();
        config.attention_probs_dropout_prob = 0.5;
        config.hidden_dropout_prob = 0.5;
        let attention = SelfAttention::new(&config, vb.pp("attn"))?;

        let hidden = Tensor::randn(0f32, 1.0, (1, 5, 16), &device)?;
        let mask = Tensor::zeros((1, 1, 1, 5), DType::F32, &device)?;
        let (first, _) = attention.forward(&hidden, &mask, false)?;
        let (second, _) = attention.forward(&hidden, &mask, false)?;
        let diff = first.sub(&second)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
