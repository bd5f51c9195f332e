//! Additive attention-mask builders.
//!
//! Masks produced here are shaped `(batch, 1, 1, seq)` so they broadcast over
//! heads and query positions: zero where attention is allowed, a large
//! negative value where it is suppressed. The penalty must dominate the
//! scaled logits so masked positions vanish under softmax.

use candle_core::{DType, Result, Tensor};
use layers::checks;

/// Penalty used when extending a caller-supplied 0/1 mask.
pub const MASK_PENALTY: f64 = -10000.0;
/// Penalty used when deriving a mask from padding tokens.
pub const PAD_PENALTY: f64 = -1e9;

/// Extends a `(batch, seq)` mask of ones (attend) and zeros (ignore) into the
/// additive `(batch, 1, 1, seq)` layout with the given penalty at zeros.
pub fn extend_attention_mask(mask: &Tensor, penalty: f64) -> Result<Tensor> {
    checks::expect_batch_seq("attention_mask", mask)?;
    let mask = mask.to_dtype(DType::F32)?.unsqueeze(1)?.unsqueeze(2)?;
    let inverted = (mask.ones_like()? - &mask)?;
    inverted.affine(penalty, 0.0)
}

/// Builds the additive mask used when the caller supplies none: every
/// padding token receives the pad penalty.
pub fn pad_token_mask(input_ids: &Tensor, pad_token_id: u32) -> Result<Tensor> {
    checks::expect_batch_seq("input_ids", input_ids)?;
    let ids = input_ids.to_dtype(DType::I64)?;
    let is_pad = ids.eq(pad_token_id as i64)?.to_dtype(DType::F32)?;
    is_pad.affine(PAD_PENALTY, 0.0)?.unsqueeze(1)?.unsqueeze(2)
}
