//! DistilBERT model family: standard-attention encoder over word and
//! position embeddings (no segment table), plus the fine-tuning heads.

use attention::masks;
use candle_core::{bail, Result, Tensor};
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};
use embedding::{PositionStyle, TransformerEmbeddings};
use layers::{checks, init, Activation};

use crate::config::ModelConfig;
use crate::encoder::{Encoder, EncoderOutput};

/// The bare DistilBERT transformer outputting the final hidden states.
#[derive(Debug)]
pub struct DistilBertModel {
    embeddings: TransformerEmbeddings,
    encoder: Encoder,
    config: ModelConfig,
}

impl DistilBertModel {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        if config.position_style != PositionStyle::Absolute {
            bail!("DistilBERT uses learned absolute positions");
        }
        if config.projects_embeddings() {
            bail!("DistilBERT does not project embeddings; embedding_size must equal hidden_size");
        }
        if config.type_vocab_size.is_some() {
            bail!("DistilBERT carries no token-type embeddings; unset type_vocab_size");
        }
        Ok(Self {
            embeddings: TransformerEmbeddings::new(
                &config.embeddings_config(),
                vb.pp("embeddings"),
            )?,
            encoder: Encoder::new(config, vb.pp("encoder"))?,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Runs the encoder and keeps every per-layer snapshot.
    ///
    /// A missing attention mask is derived from the padding token.
    pub fn encode(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderOutput> {
        checks::expect_batch_seq("input_ids", input_ids)?;
        let extended = match attention_mask {
            Some(mask) => masks::extend_attention_mask(mask, masks::PAD_PENALTY)?,
            None => masks::pad_token_mask(input_ids, self.config.pad_token_id)?,
        };
        let embedded = self.embeddings.forward(input_ids, None, train)?;
        self.encoder.forward(&embedded, &extended, train)
    }

    /// `(batch, seq)` ids -> `(batch, seq, hidden)` hidden states.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        Ok(self.encode(input_ids, attention_mask, train)?.sequence_output)
    }
}

/// Sequence classification over the first-token representation.
#[derive(Debug)]
pub struct DistilBertForSequenceClassification {
    distilbert: DistilBertModel,
    pre_classifier: Linear,
    dropout: Dropout,
    classifier: Linear,
}

impl DistilBertForSequenceClassification {
    /// `dropout` overrides the model hidden dropout when provided.
    pub fn new(
        config: &ModelConfig,
        num_classes: usize,
        dropout: Option<f32>,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            distilbert: DistilBertModel::new(config, vb.pp("distilbert"))?,
            pre_classifier: init::linear(
                config.hidden_size,
                config.hidden_size,
                config.initializer_range,
                vb.pp("pre_classifier"),
            )?,
            dropout: Dropout::new(dropout.unwrap_or(config.hidden_dropout_prob)),
            classifier: init::linear(
                config.hidden_size,
                num_classes,
                config.initializer_range,
                vb.pp("classifier"),
            )?,
        })
    }

    /// `(batch, seq)` ids -> `(batch, num_classes)` logits.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let sequence_output = self.distilbert.forward(input_ids, attention_mask, train)?;
        let pooled = sequence_output.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pre_classifier.forward(&pooled)?.relu()?;
        let pooled = self.dropout.forward(&pooled, train)?;
        self.classifier.forward(&pooled)
    }
}

/// Span extraction: start/end logits over the sequence.
#[derive(Debug)]
pub struct DistilBertForQuestionAnswering {
    distilbert: DistilBertModel,
    dropout: Dropout,
    classifier: Linear,
}

impl DistilBertForQuestionAnswering {
    pub fn new(config: &ModelConfig, dropout: Option<f32>, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            distilbert: DistilBertModel::new(config, vb.pp("distilbert"))?,
            dropout: Dropout::new(dropout.unwrap_or(config.hidden_dropout_prob)),
            classifier: init::linear(
                config.hidden_size,
                2,
                config.initializer_range,
                vb.pp("classifier"),
            )?,
        })
    }

    /// Returns `(start_logits, end_logits)`, each `(batch, seq)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let sequence_output = self.distilbert.forward(input_ids, attention_mask, train)?;
        let sequence_output = self.dropout.forward(&sequence_output, train)?;
        let logits = self.classifier.forward(&sequence_output)?;
        let logits = logits.permute((2, 0, 1))?.contiguous()?;
        let start_logits = logits.get(0)?;
        let end_logits = logits.get(1)?;
        Ok((start_logits, end_logits))
    }
}

/// Per-token classification on the sequence output.
#[derive(Debug)]
pub struct DistilBertForTokenClassification {
    distilbert: DistilBertModel,
    dropout: Dropout,
    classifier: Linear,
}

impl DistilBertForTokenClassification {
    pub fn new(
        config: &ModelConfig,
        num_classes: usize,
        dropout: Option<f32>,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            distilbert: DistilBertModel::new(config, vb.pp("distilbert"))?,
            dropout: Dropout::new(dropout.unwrap_or(config.hidden_dropout_prob)),
            classifier: init::linear(
                config.hidden_size,
                num_classes,
                config.initializer_range,
                vb.pp("classifier"),
            )?,
        })
    }

    /// `(batch, seq)` ids -> `(batch, seq, num_classes)` logits.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let sequence_output = self.distilbert.forward(input_ids, attention_mask, train)?;
        let sequence_output = self.dropout.forward(&sequence_output, train)?;
        self.classifier.forward(&sequence_output)
    }
}

/// Masked-LM head: transform, gelu, layer norm, vocabulary projection.
#[derive(Debug)]
pub struct DistilBertForMaskedLM {
    distilbert: DistilBertModel,
    vocab_transform: Linear,
    vocab_layer_norm: LayerNorm,
    vocab_projector: Linear,
}

impl DistilBertForMaskedLM {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            distilbert: DistilBertModel::new(config, vb.pp("distilbert"))?,
            vocab_transform: init::linear(
                config.hidden_size,
                config.hidden_size,
                config.initializer_range,
                vb.pp("vocab_transform"),
            )?,
            vocab_layer_norm: init::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("vocab_layer_norm"),
            )?,
            vocab_projector: init::linear(
                config.hidden_size,
                config.vocab_size,
                config.initializer_range,
                vb.pp("vocab_projector"),
            )?,
        })
    }

    /// `(batch, seq)` ids -> `(batch, seq, vocab)` prediction logits.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let sequence_output = self.distilbert.forward(input_ids, attention_mask, train)?;
        let hidden = self.vocab_transform.forward(&sequence_output)?;
        let hidden = Activation::Gelu.forward(&hidden)?;
        let hidden = self.vocab_layer_norm.forward(&hidden)?;
        self.vocab_projector.forward(&hidden)
    }
}
