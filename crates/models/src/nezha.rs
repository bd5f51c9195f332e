//! NeZha model family: relative-position encoder plus task heads.
//!
//! The base model combines word and segment embeddings (positions are
//! injected inside attention as relative-distance biases), the encoder
//! stack, and a first-token pooler. Task heads are thin stateless functions
//! from the encoder outputs to task-shaped logits.

use attention::masks;
use candle_core::{bail, DType, Result, Tensor};
use candle_nn::init::Init;
use candle_nn::{Dropout, LayerNorm, Linear, Module, VarBuilder};
use embedding::{PositionStyle, TransformerEmbeddings};
use layers::{checks, init, loss, Activation};

use crate::config::ModelConfig;
use crate::encoder::{Encoder, EncoderOutput};
use crate::pooler::Pooler;

/// Sentinel excluding a position from the NeZha pretraining losses.
pub const IGNORE_INDEX: i64 = -1;

/// The bare NeZha transformer outputting hidden states and a pooled output.
#[derive(Debug)]
pub struct NeZhaModel {
    embeddings: TransformerEmbeddings,
    encoder: Encoder,
    pooler: Pooler,
    config: ModelConfig,
}

impl NeZhaModel {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        if config.position_style != PositionStyle::Relative {
            bail!("NeZha requires position_style = relative");
        }
        if config.projects_embeddings() {
            bail!("NeZha does not project embeddings; embedding_size must equal hidden_size");
        }
        Ok(Self {
            embeddings: TransformerEmbeddings::new(
                &config.embeddings_config(),
                vb.pp("embeddings"),
            )?,
            encoder: Encoder::new(config, vb.pp("encoder"))?,
            pooler: Pooler::new(config.hidden_size, config.initializer_range, vb.pp("pooler"))?,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Word-embedding table, exposed for the tied LM prediction head.
    pub fn word_embeddings(&self) -> &Tensor {
        self.embeddings.word_embeddings()
    }

    /// Runs the encoder and keeps every per-layer snapshot.
    ///
    /// A missing attention mask defaults to all ones (attend everywhere);
    /// the binary mask is extended into the additive `(batch, 1, 1, seq)`
    /// layout before entering the stack.
    pub fn encode(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<EncoderOutput> {
        let (batch, seq_len) = checks::expect_batch_seq("input_ids", input_ids)?;
        let extended = match attention_mask {
            Some(mask) => masks::extend_attention_mask(mask, masks::MASK_PENALTY)?,
            None => {
                let ones = Tensor::ones((batch, seq_len), DType::F32, input_ids.device())?;
                masks::extend_attention_mask(&ones, masks::MASK_PENALTY)?
            }
        };
        let embedded = self.embeddings.forward(input_ids, token_type_ids, train)?;
        self.encoder.forward(&embedded, &extended, train)
    }

    /// Returns `(sequence_output, pooled_output)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let output = self.encode(input_ids, token_type_ids, attention_mask, train)?;
        let pooled = self.pooler.forward(&output.sequence_output)?;
        Ok((output.sequence_output, pooled))
    }
}

/// Sequence-level classification on the pooled output.
#[derive(Debug)]
pub struct NeZhaForSequenceClassification {
    nezha: NeZhaModel,
    dropout: Dropout,
    classifier: Linear,
}

impl NeZhaForSequenceClassification {
    /// `dropout` overrides the model hidden dropout when provided.
    pub fn new(
        config: &ModelConfig,
        num_classes: usize,
        dropout: Option<f32>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let nezha = NeZhaModel::new(config, vb.pp("nezha"))?;
        Ok(Self {
            nezha,
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
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (_, pooled) = self
            .nezha
            .forward(input_ids, token_type_ids, attention_mask, train)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        self.classifier.forward(&pooled)
    }
}

/// Per-token classification on the sequence output.
#[derive(Debug)]
pub struct NeZhaForTokenClassification {
    nezha: NeZhaModel,
    dropout: Dropout,
    classifier: Linear,
}

impl NeZhaForTokenClassification {
    pub fn new(
        config: &ModelConfig,
        num_classes: usize,
        dropout: Option<f32>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let nezha = NeZhaModel::new(config, vb.pp("nezha"))?;
        Ok(Self {
            nezha,
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
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (sequence_output, _) = self
            .nezha
            .forward(input_ids, token_type_ids, attention_mask, train)?;
        let sequence_output = self.dropout.forward(&sequence_output, train)?;
        self.classifier.forward(&sequence_output)
    }
}

/// Span extraction: start/end logits over the sequence.
#[derive(Debug)]
pub struct NeZhaForQuestionAnswering {
    nezha: NeZhaModel,
    classifier: Linear,
}

impl NeZhaForQuestionAnswering {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let nezha = NeZhaModel::new(config, vb.pp("nezha"))?;
        Ok(Self {
            nezha,
            classifier: init::linear(
                config.hidden_size,
                2,
                config.initializer_range,
                vb.pp("classifier"),
            )?,
        })
    }

    /// Returns `(start_logits, end_logits)`, each `(batch, seq)`.
    ///
    /// The 2-wide projection is split by moving the logit axis to the front
    /// and unstacking it.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (sequence_output, _) = self
            .nezha
            .forward(input_ids, token_type_ids, attention_mask, train)?;
        let logits = self.classifier.forward(&sequence_output)?;
        let logits = logits.permute((2, 0, 1))?.contiguous()?;
        let start_logits = logits.get(0)?;
        let end_logits = logits.get(1)?;
        Ok((start_logits, end_logits))
    }
}

/// Multiple-choice scoring over `(batch, choices, seq)` inputs.
#[derive(Debug)]
pub struct NeZhaForMultipleChoice {
    nezha: NeZhaModel,
    dropout: Dropout,
    classifier: Linear,
    num_choices: usize,
}

impl NeZhaForMultipleChoice {
    pub fn new(
        config: &ModelConfig,
        num_choices: usize,
        dropout: Option<f32>,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_choices == 0 {
            bail!("multiple choice requires num_choices > 0");
        }
        let nezha = NeZhaModel::new(config, vb.pp("nezha"))?;
        Ok(Self {
            nezha,
            dropout: Dropout::new(dropout.unwrap_or(config.hidden_dropout_prob)),
            classifier: init::linear(
                config.hidden_size,
                1,
                config.initializer_range,
                vb.pp("classifier"),
            )?,
            num_choices,
        })
    }

    /// `(batch, choices, seq)` ids -> `(batch, choices)` logits.
    ///
    /// Choices are flattened into the batch axis for the encoder pass and
    /// the per-choice scores reshaped back at the end.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (batch, num_choices, seq_len) = input_ids.dims3()?;
        if num_choices != self.num_choices {
            bail!(
                "expected {} choices per example, got {num_choices}",
                self.num_choices
            );
        }
        let flat_ids = input_ids.reshape((batch * num_choices, seq_len))?;
        let flat_types = token_type_ids
            .map(|ids| ids.reshape((batch * num_choices, seq_len)))
            .transpose()?;
        let flat_mask = attention_mask
            .map(|mask| mask.reshape((batch * num_choices, seq_len)))
            .transpose()?;

        let (_, pooled) =
            self.nezha
                .forward(&flat_ids, flat_types.as_ref(), flat_mask.as_ref(), train)?;
        let pooled = self.dropout.forward(&pooled, train)?;
        let logits = self.classifier.forward(&pooled)?;
        logits.reshape((batch, num_choices))
    }
}

/// Masked-LM projection tied to the word-embedding table.
#[derive(Debug)]
pub struct NeZhaLMPredictionHead {
    dense: Linear,
    activation: Activation,
    layer_norm: LayerNorm,
    decoder_weight: Tensor,
    decoder_bias: Tensor,
    vocab_size: usize,
}

impl NeZhaLMPredictionHead {
    /// `embedding_weights` is the `(vocab, hidden)` table the decoder ties
    /// to; a shape mismatch is a fatal configuration error.
    pub fn new(config: &ModelConfig, embedding_weights: Tensor, vb: VarBuilder) -> Result<Self> {
        checks::expect_shape(
            "lm_head.decoder_weight",
            &embedding_weights,
            &[config.vocab_size, config.hidden_size],
        )?;
        Ok(Self {
            dense: init::linear(
                config.hidden_size,
                config.hidden_size,
                config.initializer_range,
                vb.pp("dense"),
            )?,
            activation: config.hidden_act,
            layer_norm: init::layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("layer_norm"),
            )?,
            decoder_weight: embedding_weights,
            decoder_bias: vb.get_with_hints(config.vocab_size, "decoder_bias", Init::Const(0.0))?,
            vocab_size: config.vocab_size,
        })
    }

    /// `(batch, seq, hidden)` -> `(batch, seq, vocab)` prediction scores.
    pub fn forward(&self, sequence_output: &Tensor) -> Result<Tensor> {
        let hidden = self.dense.forward(sequence_output)?;
        let hidden = self.activation.forward(&hidden)?;
        let hidden = self.layer_norm.forward(&hidden)?;

        let (batch, seq, hidden_size) = hidden.dims3()?;
        let flat = hidden.reshape((batch * seq, hidden_size))?;
        let scores = flat.matmul(&self.decoder_weight.t()?)?;
        let scores = scores.broadcast_add(&self.decoder_bias)?;
        scores.reshape((batch, seq, self.vocab_size))
    }
}

/// Masked-LM prediction plus next-sentence scoring.
#[derive(Debug)]
pub struct NeZhaPretrainingHeads {
    predictions: NeZhaLMPredictionHead,
    seq_relationship: Linear,
}

impl NeZhaPretrainingHeads {
    pub fn new(config: &ModelConfig, embedding_weights: Tensor, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            predictions: NeZhaLMPredictionHead::new(
                config,
                embedding_weights,
                vb.pp("predictions"),
            )?,
            seq_relationship: init::linear(
                config.hidden_size,
                2,
                config.initializer_range,
                vb.pp("seq_relationship"),
            )?,
        })
    }

    /// Returns `(prediction_scores, seq_relationship_score)`.
    pub fn forward(&self, sequence_output: &Tensor, pooled_output: &Tensor) -> Result<(Tensor, Tensor)> {
        let prediction_scores = self.predictions.forward(sequence_output)?;
        let seq_relationship_score = self.seq_relationship.forward(pooled_output)?;
        Ok((prediction_scores, seq_relationship_score))
    }
}

/// NeZha with both pretraining heads and the combined loss.
#[derive(Debug)]
pub struct NeZhaForPretraining {
    nezha: NeZhaModel,
    heads: NeZhaPretrainingHeads,
}

impl NeZhaForPretraining {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let nezha = NeZhaModel::new(config, vb.pp("nezha"))?;
        let embedding_weights = nezha.word_embeddings().clone();
        let heads = NeZhaPretrainingHeads::new(config, embedding_weights, vb.pp("cls"))?;
        Ok(Self { nezha, heads })
    }

    /// Returns `(prediction_scores, seq_relationship_score)`.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        train: bool,
    ) -> Result<(Tensor, Tensor)> {
        let (sequence_output, pooled_output) = self
            .nezha
            .forward(input_ids, token_type_ids, attention_mask, train)?;
        self.heads.forward(&sequence_output, &pooled_output)
    }

    /// Masked-LM loss, plus the next-sentence loss when labels are given.
    ///
    /// Positions labelled [`IGNORE_INDEX`] are excluded; a batch with no
    /// masked position contributes an exact zero masked-LM loss.
    pub fn loss(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        masked_lm_labels: &Tensor,
        next_sentence_label: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let (prediction_scores, seq_relationship_score) =
            self.forward(input_ids, token_type_ids, attention_mask, train)?;
        let (batch, seq, vocab) = prediction_scores.dims3()?;
        let masked_lm_loss = loss::cross_entropy_ignore_index(
            &prediction_scores.reshape((batch * seq, vocab))?,
            masked_lm_labels,
            IGNORE_INDEX,
        )?;
        match next_sentence_label {
            Some(labels) => {
                let next_sentence_loss = loss::cross_entropy_ignore_index(
                    &seq_relationship_score,
                    labels,
                    IGNORE_INDEX,
                )?;
                masked_lm_loss.add(&next_sentence_loss)
            }
            None => Ok(masked_lm_loss),
        }
    }
}
