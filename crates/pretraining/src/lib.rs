//! ELECTRA-style generator/discriminator pretraining objective.
//!
//! The generator proposes replacements for masked tokens, the discriminator
//! labels every position as original or replaced, and the criterion combines
//! a masked cross-entropy with a per-position binary cross-entropy under the
//! configured weights.

pub mod criterion;
pub mod electra;

pub use criterion::ElectraPretrainingCriterion;
pub use electra::{
    sample_from_softmax, ElectraDiscriminator, ElectraForTotalPretraining, ElectraGenerator,
    PretrainingConfig, PretrainingOutput, MASKED_LM_IGNORE_INDEX,
};
