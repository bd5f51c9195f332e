//! Error type for the attention kernels.

use thiserror::Error;

/// Attention-specific failure category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The supplied tensor shapes or sizes do not align with the contract.
    #[error("invalid attention configuration: {context}")]
    InvalidConfig { context: String },
    /// The sequence is longer than the precomputed relative-position table.
    #[error("sequence length {seq_len} exceeds the relative-position table bound {bound}")]
    SequenceTooLong { seq_len: usize, bound: usize },
}

impl From<AttentionError> for candle_core::Error {
    fn from(err: AttentionError) -> Self {
        candle_core::Error::Msg(err.to_string())
    }
}
