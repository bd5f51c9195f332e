//! Encoder stack: attention plus feed-forward layers applied in sequence.
//!
//! Layers are built by a factory loop so each owns an independent parameter
//! set. The stack is a deterministic, stateless composition: the only
//! hand-off between layers is the hidden-state tensor itself. Every forward
//! pass also records the per-layer hidden states and attention-score
//! snapshots for inspection.

use attention::{RelativeSelfAttention, SelfAttention};
use candle_core::{Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Module, VarBuilder};
use embedding::PositionStyle;
use layers::{init, FeedForward};

use crate::config::ModelConfig;

/// Attention flavour selected once when the stack is assembled.
#[derive(Debug)]
enum AttentionLayer {
    Standard(SelfAttention),
    Relative(RelativeSelfAttention),
}

impl AttentionLayer {
    fn forward(&self, hidden: &Tensor, mask: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        match self {
            Self::Standard(layer) => layer.forward(hidden, mask, train),
            Self::Relative(layer) => layer.forward(hidden, mask, train),
        }
    }
}

/// One attention + feed-forward layer with post-norm residuals.
#[derive(Debug)]
pub struct EncoderLayer {
    attention: AttentionLayer,
    feed_forward: FeedForward,
    layer_norm: LayerNorm,
    dropout: Dropout,
}

impl EncoderLayer {
    fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let attention_config = config.attention_config();
        let attention = match config.position_style {
            PositionStyle::Relative => AttentionLayer::Relative(RelativeSelfAttention::new(
                &attention_config,
                config.max_position_embeddings,
                config.max_relative_position,
                vb.pp("attention"),
            )?),
            PositionStyle::Absolute => {
                AttentionLayer::Standard(SelfAttention::new(&attention_config, vb.pp("attention"))?)
            }
        };
        let feed_forward = FeedForward::new(
            &config.feed_forward_config(),
            config.initializer_range,
            vb.pp("ffn"),
        )?;
        let layer_norm = init::layer_norm(
            config.hidden_size,
            config.layer_norm_eps,
            vb.pp("layer_norm"),
        )?;
        Ok(Self {
            attention,
            feed_forward,
            layer_norm,
            dropout: Dropout::new(config.hidden_dropout_prob),
        })
    }

    /// Runs attention and the feed-forward branch; returns the layer output
    /// and the attention-score snapshot.
    pub fn forward(&self, hidden: &Tensor, mask: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let (attention_output, scores) = self.attention.forward(hidden, mask, train)?;
        let ffn_output = self.feed_forward.forward(&attention_output)?;
        let ffn_output = self.dropout.forward(&ffn_output, train)?;
        let output = self
            .layer_norm
            .forward(&ffn_output.add(&attention_output)?)?;
        Ok((output, scores))
    }
}

/// Per-layer snapshots collected during a forward pass.
#[derive(Debug)]
pub struct EncoderOutput {
    /// Final hidden states, `(batch, seq, hidden)`.
    pub sequence_output: Tensor,
    /// Hidden states entering each layer plus the final output
    /// (`num_hidden_layers + 1` entries).
    pub hidden_states: Vec<Tensor>,
    /// Post-mask, pre-softmax attention scores per layer.
    pub attention_scores: Vec<Tensor>,
}

/// Sequential stack of encoder layers.
#[derive(Debug)]
pub struct Encoder {
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    /// Builds `num_hidden_layers` independently parameterised layers.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for index in 0..config.num_hidden_layers {
            layers.push(EncoderLayer::new(config, vb.pp(format!("layer_{index}")))?);
        }
        log::debug!(
            "assembled encoder stack: layers={} style={:?}",
            layers.len(),
            config.position_style
        );
        Ok(Self { layers })
    }

    /// Threads the hidden states through every layer in order.
    pub fn forward(&self, hidden: &Tensor, mask: &Tensor, train: bool) -> Result<EncoderOutput> {
        let mut hidden_states = Vec::with_capacity(self.layers.len() + 1);
        let mut attention_scores = Vec::with_capacity(self.layers.len());
        let mut current = hidden.clone();
        for layer in &self.layers {
            hidden_states.push(current.clone());
            let (next, scores) = layer.forward(&current, mask, train)?;
            attention_scores.push(scores);
            current = next;
        }
        hidden_states.push(current.clone());
        Ok(EncoderOutput {
            sequence_output: current,
            hidden_states,
            attention_scores,
        })
    }
}
