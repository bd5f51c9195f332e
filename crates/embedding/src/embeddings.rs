//! Combined token, position, and segment embedding block.
//!
//! Inputs are `(batch, seq)` integer token ids; outputs follow the
//! `(batch, seq, embedding_size)` layout. Which tables exist is decided once
//! from the configuration: stacks that inject positions inside attention skip
//! the learned position table entirely, and stacks without segment ids skip
//! the token-type table.

use candle_core::{bail, Result, Tensor};
use candle_nn::{Dropout, Embedding, LayerNorm, Module, VarBuilder};
use layers::{checks, init};
use serde::{Deserialize, Serialize};

/// How token positions enter the representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStyle {
    /// A learned embedding per absolute position is added to the tokens.
    Absolute,
    /// Positions are injected inside attention as relative-distance biases;
    /// no learned position table exists.
    Relative,
}

/// Configuration for the combined embedding block.
#[derive(Debug, Clone)]
pub struct EmbeddingsConfig {
    pub vocab_size: usize,
    pub embedding_size: usize,
    pub max_position_embeddings: usize,
    /// Segment vocabulary; `None` disables the token-type table.
    pub type_vocab_size: Option<usize>,
    pub position_style: PositionStyle,
    pub hidden_dropout_prob: f32,
    pub layer_norm_eps: f64,
    pub initializer_range: f64,
}

/// Token + position + segment embeddings with normalisation and dropout.
#[derive(Debug)]
pub struct TransformerEmbeddings {
    word: Embedding,
    position: Option<Embedding>,
    token_type: Option<Embedding>,
    layer_norm: LayerNorm,
    dropout: Dropout,
    max_positions: usize,
}

impl TransformerEmbeddings {
    /// Builds the tables selected by the configuration.
    pub fn new(config: &EmbeddingsConfig, vb: VarBuilder) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("embeddings require vocab_size > 0");
        }
        if config.embedding_size == 0 {
            bail!("embeddings require embedding_size > 0");
        }
        let std = config.initializer_range;
        let word = init::embedding(
            config.vocab_size,
            config.embedding_size,
            std,
            vb.pp("word_embeddings"),
        )?;
        let position = match config.position_style {
            PositionStyle::Absolute => {
                if config.max_position_embeddings == 0 {
                    bail!("absolute positions require max_position_embeddings > 0");
                }
                Some(init::embedding(
                    config.max_position_embeddings,
                    config.embedding_size,
                    std,
                    vb.pp("position_embeddings"),
                )?)
            }
            PositionStyle::Relative => None,
        };
        let token_type = match config.type_vocab_size {
            Some(size) => {
                if size == 0 {
                    bail!("type_vocab_size must be positive when segments are enabled");
                }
                Some(init::embedding(
                    size,
                    config.embedding_size,
                    std,
                    vb.pp("token_type_embeddings"),
                )?)
            }
            None => None,
        };
        let layer_norm = init::layer_norm(
            config.embedding_size,
            config.layer_norm_eps,
            vb.pp("layer_norm"),
        )?;
        Ok(Self {
            word,
            position,
            token_type,
            layer_norm,
            dropout: Dropout::new(config.hidden_dropout_prob),
            max_positions: config.max_position_embeddings,
        })
    }

    /// The word-embedding table, exposed for tied readout heads.
    pub fn word_embeddings(&self) -> &Tensor {
        self.word.embeddings()
    }

    /// Embeds the token ids; segment ids default to zeros when a token-type
    /// table exists but no ids are provided.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (_batch, seq_len) = checks::expect_batch_seq("embeddings.input_ids", input_ids)?;
        let mut embeddings = self.word.forward(input_ids)?;

        if let Some(position) = &self.position {
            if seq_len > self.max_positions {
                bail!(
                    "sequence length {seq_len} exceeds max_position_embeddings {}",
                    self.max_positions
                );
            }
            let position_ids = Tensor::arange(0u32, seq_len as u32, input_ids.device())?;
            let position_embeddings = position.forward(&position_ids)?.unsqueeze(0)?;
            embeddings = embeddings.broadcast_add(&position_embeddings)?;
        }

        if let Some(token_type) = &self.token_type {
            let type_ids = match token_type_ids {
                Some(ids) => ids.clone(),
                None => input_ids.zeros_like()?,
            };
            embeddings = embeddings.add(&token_type.forward(&type_ids)?)?;
        }

        let normalized = self.layer_norm.forward(&embeddings)?;
        self.dropout.forward(&normalized, train)
    }
}
