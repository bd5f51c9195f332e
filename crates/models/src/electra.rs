//! ELECTRA model family: standard-attention encoder with an optional
//! embedding projection, plus fine-tuning heads and the prediction layers
//! used by the generator/discriminator pretraining objective.

use attention::masks;
use candle_core::{bail, Result, Tensor, D};
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};
use embedding::{PositionStyle, TransformerEmbeddings};
use layers::{checks, init, Activation};

use crate::config::ModelConfig;
use crate::encoder::{Encoder, EncoderOutput};

/// The bare ELECTRA transformer outputting the final hidden states.
#[derive(Debug)]
pub struct ElectraModel {
    embeddings: TransformerEmbeddings,
    /// Present exactly when `embedding_size != hidden_size`; decided once at
    /// construction.
    embeddings_project: Option<Linear>,
    encoder: Encoder,
    config: ModelConfig,
}

impl ElectraModel {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        if config.position_style != PositionStyle::Absolute {
            bail!("ELECTRA uses learned absolute positions");
        }
        let embeddings_project = if config.projects_embeddings() {
            Some(init::linear(
                config.embedding_size(),
                config.hidden_size,
                config.initializer_range,
                vb.pp("embeddings_project"),
            )?)
        } else {
            None
        };
        Ok(Self {
            embeddings: TransformerEmbeddings::new(
                &config.embeddings_config(),
                vb.pp("embeddings"),
            )?,
            embeddings_project,
            encoder: Encoder::new(config, vb.pp("encoder"))?,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Word-embedding table, exposed for tied generator heads.
    pub fn word_embeddings(&self) -> &Tensor {
        self.embeddings.word_embeddings()
    }

    /// Runs the encoder and keeps every per-layer snapshot.
    ///
    /// A missing attention mask is derived from the padding token.
    pub fn encode(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderOutput> {
        checks::expect_batch_seq("input_ids", input_ids)?;
        let extended = match attention_mask {
            Some(mask) => masks::extend_attention_mask(mask, masks::PAD_PENALTY)?,
            None => masks::pad_token_mask(input_ids, self.config.pad_token_id)?,
        };
        let mut hidden = self.embeddings.forward(input_ids, token_type_ids, train)?;
        if let Some(project) = &self.embeddings_project {
            hidden = project.forward(&hidden)?;
        }
        self.encoder.forward(&hidden, &extended, train)
    }

    /// `(batch, seq)` ids -> `(batch, seq, hidden)` hidden states.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        Ok(self
            .encode(input_ids, token_type_ids, attention_mask, train)?
            .sequence_output)
    }
}

/// Prediction layer of the discriminator: per-token real/fake logits.
#[derive(Debug)]
pub struct ElectraDiscriminatorPredictions {
    dense: Linear,
    dense_prediction: Linear,
    activation: Activation,
}

impl ElectraDiscriminatorPredictions {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dense: init::linear(
                config.hidden_size,
                config.hidden_size,
                config.initializer_range,
                vb.pp("dense"),
            )?,
            dense_prediction: init::linear(
                config.hidden_size,
                1,
                config.initializer_range,
                vb.pp("dense_prediction"),
            )?,
            activation: config.hidden_act,
        })
    }

    /// `(batch, seq, hidden)` -> `(batch, seq)` logits.
    pub fn forward(&self, discriminator_hidden_states: &Tensor) -> Result<Tensor> {
        let hidden = self.dense.forward(discriminator_hidden_states)?;
        let hidden = self.activation.forward(&hidden)?;
        self.dense_prediction.forward(&hidden)?.squeeze(D::Minus1)
    }
}

/// Prediction layer of the generator: maps hidden states back to the
/// embedding width ahead of the (tied) vocabulary decoder.
#[derive(Debug)]
pub struct ElectraGeneratorPredictions {
    dense: Linear,
    layer_norm: LayerNorm,
    activation: Activation,
}

impl ElectraGeneratorPredictions {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dense: init::linear(
                config.hidden_size,
                config.embedding_size(),
                config.initializer_range,
                vb.pp("dense"),
            )?,
            layer_norm: init::layer_norm(
                config.embedding_size(),
                config.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            activation: config.hidden_act,
        })
    }

    /// `(batch, seq, hidden)` -> `(batch, seq, embedding_size)`.
    pub fn forward(&self, generator_hidden_states: &Tensor) -> Result<Tensor> {
        let hidden = self.dense.forward(generator_hidden_states)?;
        let hidden = self.activation.forward(&hidden)?;
        self.layer_norm.forward(&hidden)
    }
}

/// Sentence-level head: first token -> dense -> gelu -> projection.
#[derive(Debug)]
pub struct ElectraClassificationHead {
    dense: Linear,
    dropout: Dropout,
    out_proj: Linear,
}

impl ElectraClassificationHead {
    pub fn new(config: &ModelConfig, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dense: init::linear(
                config.hidden_size,
                config.hidden_size,
                config.initializer_range,
                vb.pp("dense"),
            )?,
            dropout: Dropout::new(config.hidden_dropout_prob),
            out_proj: init::linear(
                config.hidden_size,
                num_classes,
                config.initializer_range,
                vb.pp("out_proj"),
            )?,
        })
    }

    /// `(batch, seq, hidden)` features -> `(batch, num_classes)` logits.
    pub fn forward(&self, features: &Tensor, train: bool) -> Result<Tensor> {
        let first_token = features.narrow(1, 0, 1)?.squeeze(1)?;
        let hidden = self.dropout.forward(&first_token, train)?;
        let hidden = self.dense.forward(&hidden)?;
        // The ELECTRA paper uses gelu here regardless of the stack activation.
        let hidden = Activation::Gelu.forward(&hidden)?;
        let hidden = self.dropout.forward(&hidden, train)?;
        self.out_proj.forward(&hidden)
    }
}

/// Sequence classification over the classification head.
#[derive(Debug)]
pub struct ElectraForSequenceClassification {
    electra: ElectraModel,
    classifier: ElectraClassificationHead,
}

impl ElectraForSequenceClassification {
    pub fn new(config: &ModelConfig, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            electra: ElectraModel::new(config, vb.pp("electra"))?,
            classifier: ElectraClassificationHead::new(config, num_classes, vb.pp("classifier"))?,
        })
    }

    /// `(batch, seq)` ids -> `(batch, num_classes)` logits.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let sequence_output = self
            .electra
            .forward(input_ids, token_type_ids, attention_mask, train)?;
        self.classifier.forward(&sequence_output, train)
    }
}

/// Per-token classification on the sequence output.
#[derive(Debug)]
pub struct ElectraForTokenClassification {
    electra: ElectraModel,
    dropout: Dropout,
    classifier: Linear,
}

impl ElectraForTokenClassification {
    pub fn new(config: &ModelConfig, num_classes: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            electra: ElectraModel::new(config, vb.pp("electra"))?,
            dropout: Dropout::new(config.hidden_dropout_prob),
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
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let sequence_output = self
            .electra
            .forward(input_ids, token_type_ids, attention_mask, train)?;
        let sequence_output = self.dropout.forward(&sequence_output, train)?;
        self.classifier.forward(&sequence_output)
    }
}
