//! Lightweight validation helpers shared across model components.
//!
//! These routines provide concise shape assertions that can be wired into
//! constructors or forward paths. They return `candle_core::Result<()>` so
//! call sites can propagate errors without panicking.

use candle_core::{Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(context: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: expected shape {expected:?}, got {actual:?}"
        )))
    }
}

/// Validates the `(batch, seq)` token-id convention and returns both sizes.
pub fn expect_batch_seq(context: &str, tensor: &Tensor) -> Result<(usize, usize)> {
    match tensor.dims() {
        [batch, seq] => Ok((*batch, *seq)),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq) layout, got {dims:?}"
        ))),
    }
}

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(
    context: &str,
    tensor: &Tensor,
    hidden: usize,
) -> Result<(usize, usize)> {
    match tensor.dims() {
        [batch, seq, actual] if *actual == hidden => Ok((*batch, *seq)),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}
