//! First-token pooling for sequence-level heads.

use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use layers::init;

/// Projects the first-token representation through a tanh-activated dense
/// layer, producing the pooled output used by sequence-level heads.
#[derive(Debug)]
pub struct Pooler {
    dense: Linear,
}

impl Pooler {
    pub fn new(hidden_size: usize, initializer_range: f64, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            dense: init::linear(hidden_size, hidden_size, initializer_range, vb.pp("dense"))?,
        })
    }

    /// `(batch, seq, hidden)` -> `(batch, hidden)`.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor> {
        let first_token = hidden_states.narrow(1, 0, 1)?.squeeze(1)?;
        self.dense.forward(&first_token)?.tanh()
    }
}
