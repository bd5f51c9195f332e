//! Generator and discriminator networks and their coupling.

use candle_core::{bail, DType, Result, Tensor, D};
use candle_nn::init::Init;
use candle_nn::ops::softmax_last_dim;
use candle_nn::{Linear, Module, VarBuilder};
use layers::{checks, init};
use models::config::ModelConfig;
use models::electra::{
    ElectraDiscriminatorPredictions, ElectraGeneratorPredictions, ElectraModel,
};

/// Sentinel marking positions excluded from the generator loss.
pub const MASKED_LM_IGNORE_INDEX: i64 = -100;

/// Knobs of the coupled pretraining objective.
#[derive(Debug, Clone, PartialEq)]
pub struct PretrainingConfig {
    /// Weight of the generator loss in the combination.
    pub gen_weight: f64,
    /// Weight of the discriminator loss in the combination.
    pub disc_weight: f64,
    /// Decode generator logits with the transpose of the word-embedding
    /// table instead of a free projection.
    pub tie_word_embeddings: bool,
    /// Perturb generator logits with Gumbel noise before taking the argmax;
    /// disabled, sampling degenerates to a plain argmax.
    pub use_softmax_sample: bool,
}

impl Default for PretrainingConfig {
    fn default() -> Self {
        Self {
            gen_weight: 1.0,
            disc_weight: 50.0,
            tie_word_embeddings: true,
            use_softmax_sample: true,
        }
    }
}

/// Vocabulary decoder of the generator, tied or free.
#[derive(Debug)]
enum GeneratorLmHead {
    /// Decodes with the transpose of the word-embedding table plus a free
    /// bias vector.
    Tied { bias: Tensor },
    Untied(Linear),
}

/// ELECTRA with the masked-LM generator head on top.
#[derive(Debug)]
pub struct ElectraGenerator {
    electra: ElectraModel,
    predictions: ElectraGeneratorPredictions,
    lm_head: GeneratorLmHead,
}

impl ElectraGenerator {
    pub fn new(config: &ModelConfig, tie_word_embeddings: bool, vb: VarBuilder) -> Result<Self> {
        let electra = ElectraModel::new(config, vb.pp("electra"))?;
        let predictions = ElectraGeneratorPredictions::new(config, vb.pp("generator_predictions"))?;
        let lm_head = if tie_word_embeddings {
            // The decoder reuses the embedding table; its shape must line up
            // with the prediction width.
            checks::expect_shape(
                "generator.lm_head.weight",
                electra.word_embeddings(),
                &[config.vocab_size, config.embedding_size()],
            )?;
            GeneratorLmHead::Tied {
                bias: vb.get_with_hints(config.vocab_size, "generator_lm_head.bias", Init::Const(0.0))?,
            }
        } else {
            GeneratorLmHead::Untied(init::linear(
                config.embedding_size(),
                config.vocab_size,
                config.initializer_range,
                vb.pp("generator_lm_head"),
            )?)
        };
        Ok(Self {
            electra,
            predictions,
            lm_head,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        self.electra.config()
    }

    /// `(batch, seq)` ids -> `(batch, seq, vocab)` per-token vocabulary logits.
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
        let prediction = self.predictions.forward(&sequence_output)?;
        match &self.lm_head {
            GeneratorLmHead::Tied { bias } => {
                let (batch, seq, width) = prediction.dims3()?;
                let flat = prediction.reshape((batch * seq, width))?;
                let logits = flat.matmul(&self.electra.word_embeddings().t()?)?;
                let logits = logits.broadcast_add(bias)?;
                let vocab = self.electra.config().vocab_size;
                logits.reshape((batch, seq, vocab))
            }
            GeneratorLmHead::Untied(linear) => linear.forward(&prediction),
        }
    }
}

/// ELECTRA with the real/fake discriminator head on top.
#[derive(Debug)]
pub struct ElectraDiscriminator {
    electra: ElectraModel,
    predictions: ElectraDiscriminatorPredictions,
}

impl ElectraDiscriminator {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            electra: ElectraModel::new(config, vb.pp("electra"))?,
            predictions: ElectraDiscriminatorPredictions::new(
                config,
                vb.pp("discriminator_predictions"),
            )?,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        self.electra.config()
    }

    /// `(batch, seq)` ids -> `(batch, seq)` per-token real/fake logits.
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
        self.predictions.forward(&sequence_output)
    }
}

/// Gumbel-perturbed sampling from vocabulary logits; returns token ids.
///
/// With `use_softmax_sample` off the noise is omitted and the sampling
/// degenerates to a temperature-free argmax. The returned ids are integer
/// tensors, so no gradient flows back through the sampling step.
pub fn sample_from_softmax(logits: &Tensor, use_softmax_sample: bool) -> Result<Tensor> {
    let perturbed = if use_softmax_sample {
        let uniform = Tensor::rand(0f32, 1f32, logits.dims(), logits.device())?
            .to_dtype(logits.dtype())?;
        let gumbel = ((uniform + 1e-9)?.log()?.neg()? + 1e-9)?.log()?.neg()?;
        logits.add(&gumbel)?
    } else {
        logits.clone()
    };
    softmax_last_dim(&perturbed)?.argmax(D::Minus1)
}

/// Everything one coupled forward pass produces.
#[derive(Debug)]
pub struct PretrainingOutput {
    /// Generator vocabulary logits, `(batch, seq, vocab)`.
    pub generator_logits: Tensor,
    /// Discriminator real/fake logits, `(batch, seq)`.
    pub discriminator_logits: Tensor,
    /// Per-position replaced (1) / original (0) labels, `(batch, seq)`.
    pub discriminator_labels: Tensor,
    /// Boolean mask of attended (non-padding) positions, `(batch, seq)`.
    pub attended_positions: Tensor,
}

/// The coupled generator/discriminator pretraining network.
#[derive(Debug)]
pub struct ElectraForTotalPretraining {
    generator: ElectraGenerator,
    discriminator: ElectraDiscriminator,
    config: PretrainingConfig,
    pad_token_id: u32,
}

impl ElectraForTotalPretraining {
    /// The generator and discriminator may differ in size but must share the
    /// vocabulary.
    pub fn new(
        generator_config: &ModelConfig,
        discriminator_config: &ModelConfig,
        config: PretrainingConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        if generator_config.vocab_size != discriminator_config.vocab_size {
            bail!(
                "generator and discriminator must share a vocabulary, got {} and {}",
                generator_config.vocab_size,
                discriminator_config.vocab_size
            );
        }
        let generator = ElectraGenerator::new(
            generator_config,
            config.tie_word_embeddings,
            vb.pp("generator"),
        )?;
        let discriminator = ElectraDiscriminator::new(discriminator_config, vb.pp("discriminator"))?;
        log::debug!(
            "coupled ELECTRA pretraining networks: generator hidden={} discriminator hidden={}",
            generator_config.hidden_size,
            discriminator_config.hidden_size
        );
        Ok(Self {
            generator,
            discriminator,
            config,
            pad_token_id: discriminator_config.pad_token_id,
        })
    }

    pub fn pretraining_config(&self) -> &PretrainingConfig {
        &self.config
    }

    /// Builds the discriminator input and its replaced-token labels.
    ///
    /// Sampled tokens replace the input only where `gen_labels` differs from
    /// the sentinel; a position is labelled replaced (1) when the sampled
    /// token differs from the raw input token.
    fn discriminator_inputs(
        &self,
        input_ids: &Tensor,
        raw_input_ids: &Tensor,
        generator_logits: &Tensor,
        gen_labels: &Tensor,
    ) -> Result<(Tensor, Tensor)> {
        let sampled =
            sample_from_softmax(generator_logits, self.config.use_softmax_sample)?
                .to_dtype(DType::I64)?;
        let ids = input_ids.to_dtype(DType::I64)?;
        let raw = raw_input_ids.to_dtype(DType::I64)?;
        let masked_positions = gen_labels.to_dtype(DType::I64)?.ne(MASKED_LM_IGNORE_INDEX)?;

        let updated = masked_positions.where_cond(&sampled, &ids)?;
        let replaced = updated.ne(&raw)?.to_dtype(DType::U32)?;
        let labels = replaced.mul(&masked_positions.to_dtype(DType::U32)?)?;
        Ok((updated, labels))
    }

    /// Runs the coupled pass. `gen_labels` must be provided: its sentinel
    /// layout decides which positions the generator replaces.
    pub fn forward(
        &self,
        input_ids: &Tensor,
        token_type_ids: Option<&Tensor>,
        attention_mask: Option<&Tensor>,
        raw_input_ids: &Tensor,
        gen_labels: Option<&Tensor>,
        train: bool,
    ) -> Result<PretrainingOutput> {
        let gen_labels = match gen_labels {
            Some(labels) => labels,
            None => bail!("gen_labels must be provided for the pretraining objective"),
        };

        let generator_logits =
            self.generator
                .forward(input_ids, token_type_ids, attention_mask, train)?;
        let (discriminator_input, discriminator_labels) =
            self.discriminator_inputs(input_ids, raw_input_ids, &generator_logits, gen_labels)?;
        let discriminator_logits = self.discriminator.forward(
            &discriminator_input,
            token_type_ids,
            attention_mask,
            train,
        )?;

        let attended_positions = match attention_mask {
            Some(mask) => mask.to_dtype(DType::I64)?.ne(0i64)?,
            None => input_ids
                .to_dtype(DType::I64)?
                .ne(self.pad_token_id as i64)?,
        };

        Ok(PretrainingOutput {
            generator_logits,
            discriminator_logits,
            discriminator_labels,
            attended_positions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn argmax_sampling_picks_the_dominant_token() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::from_slice(
            &[0.1f32, 9.0, 0.2, /* next position */ 7.0, 0.3, 0.1],
            (1, 2, 3),
            &device,
        )?;
        let sampled = sample_from_softmax(&logits, false)?;
        assert_eq!(sampled.flatten_all()?.to_vec1::<u32>()?, vec![1, 0]);
        Ok(())
    }

    #[test]
    fn gumbel_sampling_stays_in_vocab_range() -> Result<()> {
        let device = Device::Cpu;
        let logits = Tensor::randn(0f32, 1.0, (2, 8, 11), &device)?;
        let sampled = sample_from_softmax(&logits, true)?;
        assert_eq!(sampled.dims(), &[2, 8]);
        let max = sampled.flatten_all()?.to_vec1::<u32>()?;
        assert!(max.iter().all(|id| *id < 11));
        Ok(())
    }
}
