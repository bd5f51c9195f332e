//! Loss helpers shared by the pretraining objectives.
//!
//! Both helpers keep reductions explicit so the callers can apply the masked
//! averaging their objectives require.

use candle_core::{DType, Result, Tensor, D};
use candle_nn::ops;

/// Cross-entropy averaged over the positions whose label differs from
/// `ignore_index`.
///
/// `logits` is `(rows, classes)`, `labels` holds `rows` integer labels in any
/// layout. When every label equals the sentinel the result is an exact zero
/// scalar rather than a division by zero.
pub fn cross_entropy_ignore_index(
    logits: &Tensor,
    labels: &Tensor,
    ignore_index: i64,
) -> Result<Tensor> {
    let (rows, _classes) = logits.dims2()?;
    let labels = labels.flatten_all()?.to_dtype(DType::I64)?;
    expect_label_count(&labels, rows)?;

    let keep = labels.ne(ignore_index)?;
    let keep_f = keep.to_dtype(DType::F32)?;
    let total = keep_f.sum_all()?;
    if total.to_scalar::<f32>()? == 0.0 {
        return Tensor::zeros((), logits.dtype(), logits.device());
    }

    // Sentinel labels are zeroed before the gather so negative sentinels
    // never index the class axis; their contribution is masked out below.
    let safe_labels = labels.mul(&keep.to_dtype(DType::I64)?)?;
    let log_probs = ops::log_softmax(&logits.to_dtype(DType::F32)?, D::Minus1)?;
    let picked = log_probs
        .gather(&safe_labels.unsqueeze(1)?, 1)?
        .squeeze(1)?;
    let summed = picked.mul(&keep_f)?.sum_all()?.neg()?;
    summed.broadcast_div(&total)?.to_dtype(logits.dtype())
}

/// Element-wise binary cross-entropy on logits:
/// `max(x, 0) - x * z + ln(1 + exp(-|x|))`.
///
/// No reduction is applied; callers average over the positions their
/// objective attends to.
pub fn binary_cross_entropy_with_logits(logits: &Tensor, targets: &Tensor) -> Result<Tensor> {
    let targets = targets.to_dtype(logits.dtype())?;
    let linear_part = logits.relu()?;
    let product = logits.mul(&targets)?;
    let decay = logits.abs()?.neg()?.exp()?;
    linear_part.sub(&product)?.add(&(decay + 1.0)?.log()?)
}

fn expect_label_count(labels: &Tensor, rows: usize) -> Result<()> {
    if labels.elem_count() != rows {
        candle_core::bail!(
            "expected {rows} labels to match the logit rows, got {}",
            labels.elem_count()
        );
    }
    Ok(())
}
