//! Weighted pretraining loss combining the generator and discriminator.

use candle_core::{bail, DType, Result, Tensor};
use layers::loss;

use crate::electra::MASKED_LM_IGNORE_INDEX;

/// Combines the masked cross-entropy of the generator with the per-position
/// binary cross-entropy of the discriminator as
/// `gen_weight * gen_loss + disc_weight * disc_loss`.
#[derive(Debug, Clone)]
pub struct ElectraPretrainingCriterion {
    vocab_size: usize,
    gen_weight: f64,
    disc_weight: f64,
}

impl ElectraPretrainingCriterion {
    pub fn new(vocab_size: usize, gen_weight: f64, disc_weight: f64) -> Self {
        Self {
            vocab_size,
            gen_weight,
            disc_weight,
        }
    }

    /// Computes the combined scalar loss.
    ///
    /// The generator term averages only over positions whose label differs
    /// from the `-100` sentinel and is exactly zero when none is masked. The
    /// discriminator term averages over attended positions; without an
    /// attention mask its denominator is the total element count.
    pub fn forward(
        &self,
        generator_logits: &Tensor,
        discriminator_logits: &Tensor,
        generator_labels: &Tensor,
        discriminator_labels: &Tensor,
        attention_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let (batch, seq, vocab) = generator_logits.dims3()?;
        if vocab != self.vocab_size {
            bail!(
                "generator logits cover {vocab} tokens but the criterion expects {}",
                self.vocab_size
            );
        }
        let generator_loss = loss::cross_entropy_ignore_index(
            &generator_logits.reshape((batch * seq, vocab))?,
            generator_labels,
            MASKED_LM_IGNORE_INDEX,
        )?;

        let per_position = loss::binary_cross_entropy_with_logits(
            discriminator_logits,
            &discriminator_labels.to_dtype(discriminator_logits.dtype())?,
        )?;
        let discriminator_loss = match attention_mask {
            Some(mask) => {
                let keep = mask.to_dtype(DType::F32)?;
                let denominator = keep.sum_all()?;
                per_position
                    .to_dtype(DType::F32)?
                    .mul(&keep)?
                    .sum_all()?
                    .broadcast_div(&denominator)?
            }
            None => per_position.to_dtype(DType::F32)?.mean_all()?,
        };

        let weighted_generator = generator_loss.to_dtype(DType::F32)?.affine(self.gen_weight, 0.0)?;
        let weighted_discriminator = discriminator_loss.affine(self.disc_weight, 0.0)?;
        weighted_generator.add(&weighted_discriminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn unmasked_batches_contribute_only_the_discriminator_term() -> Result<()> {
        let device = Device::Cpu;
        let criterion = ElectraPretrainingCriterion::new(9, 1.0, 50.0);

        let generator_logits = Tensor::randn(0f32, 1.0, (2, 4, 9), &device)?;
        let discriminator_logits = Tensor::randn(0f32, 1.0, (2, 4), &device)?;
        let generator_labels = Tensor::full(-100i64, (2, 4), &device)?;
        let discriminator_labels = Tensor::zeros((2, 4), DType::U32, &device)?;

        let total = criterion.forward(
            &generator_logits,
            &discriminator_logits,
            &generator_labels,
            &discriminator_labels,
            None,
        )?;
        let disc_only = loss::binary_cross_entropy_with_logits(
            &discriminator_logits,
            &discriminator_labels.to_dtype(DType::F32)?,
        )?
        .mean_all()?
        .to_scalar::<f32>()?;
        let total = total.to_scalar::<f32>()?;
        assert!(
            (total - 50.0 * disc_only).abs() < 1e-4,
            "{total} vs {}",
            50.0 * disc_only
        );
        Ok(())
    }

    #[test]
    fn missing_mask_averages_over_every_position() -> Result<()> {
        let device = Device::Cpu;
        let criterion = ElectraPretrainingCriterion::new(5, 0.0, 1.0);

        let generator_logits = Tensor::randn(0f32, 1.0, (1, 6, 5), &device)?;
        let generator_labels = Tensor::full(-100i64, (1, 6), &device)?;
        let discriminator_logits = Tensor::randn(0f32, 1.0, (1, 6), &device)?;
        let discriminator_labels = Tensor::zeros((1, 6), DType::U32, &device)?;

        let without_mask = criterion
            .forward(
                &generator_logits,
                &discriminator_logits,
                &generator_labels,
                &discriminator_labels,
                None,
            )?
            .to_scalar::<f32>()?;
        let all_ones = Tensor::ones((1, 6), DType::F32, &device)?;
        let with_full_mask = criterion
            .forward(
                &generator_logits,
                &discriminator_logits,
                &generator_labels,
                &discriminator_labels,
                Some(&all_ones),
            )?
            .to_scalar::<f32>()?;
        assert!((without_mask - with_full_mask).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn padding_positions_are_excluded_from_the_average() -> Result<()> {
        let device = Device::Cpu;
        let criterion = ElectraPretrainingCriterion::new(5, 0.0, 1.0);

        let generator_logits = Tensor::randn(0f32, 1.0, (1, 4, 5), &device)?;
        let generator_labels = Tensor::full(-100i64, (1, 4), &device)?;
        let discriminator_logits =
            Tensor::from_slice(&[2.0f32, -1.0, 3.0, 100.0], (1, 4), &device)?;
        let discriminator_labels = Tensor::zeros((1, 4), DType::U32, &device)?;
        // The wild logit in the padding position must not influence the loss.
        let mask = Tensor::from_slice(&[1f32, 1.0, 1.0, 0.0], (1, 4), &device)?;

        let masked = criterion
            .forward(
                &generator_logits,
                &discriminator_logits,
                &generator_labels,
                &discriminator_labels,
                Some(&mask),
            )?
            .to_scalar::<f32>()?;

        let kept = Tensor::from_slice(&[2.0f32, -1.0, 3.0], (1, 3), &device)?;
        let expected = loss::binary_cross_entropy_with_logits(
            &kept,
            &Tensor::zeros((1, 3), DType::F32, &device)?,
        )?
        .mean_all()?
        .to_scalar::<f32>()?;
        assert!((masked - expected).abs() < 1e-5, "{masked} vs {expected}");
        Ok(())
    }

    #[test]
    fn vocabulary_mismatch_is_rejected() {
        let device = Device::Cpu;
        let criterion = ElectraPretrainingCriterion::new(10, 1.0, 50.0);
        let generator_logits = Tensor::randn(0f32, 1.0, (1, 2, 7), &device).unwrap();
        let discriminator_logits = Tensor::randn(0f32, 1.0, (1, 2), &device).unwrap();
        let labels = Tensor::full(-100i64, (1, 2), &device).unwrap();
        let disc_labels = Tensor::zeros((1, 2), DType::U32, &device).unwrap();
        assert!(criterion
            .forward(
                &generator_logits,
                &discriminator_logits,
                &labels,
                &disc_labels,
                None
            )
            .is_err());
    }
}
