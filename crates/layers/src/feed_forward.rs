//! Position-wise feed-forward block.
//!
//! Two dense projections with an activation in between: the hidden dimension
//! expands to `intermediate_size`, the non-linearity applies, then the block
//! contracts back to the model hidden size. Inputs and outputs follow the
//! `(batch, seq, hidden)` convention. Residual combination and normalisation
//! belong to the enclosing encoder layer.

use candle_core::{bail, Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};

use crate::activations::Activation;
use crate::init;

/// Configuration shared by transformer feed-forward networks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
    /// Activation applied between the projections.
    pub activation: Activation,
}

/// Two-projection MLP used inside every encoder layer.
#[derive(Debug)]
pub struct FeedForward {
    intermediate: Linear,
    output: Linear,
    activation: Activation,
}

impl FeedForward {
    /// Builds the block with normally initialised projections.
    pub fn new(config: &FeedForwardConfig, std: f64, vb: VarBuilder) -> Result<Self> {
        if config.hidden_size == 0 || config.intermediate_size == 0 {
            bail!("feed-forward dimensions must be non-zero");
        }
        let intermediate = init::linear(
            config.hidden_size,
            config.intermediate_size,
            std,
            vb.pp("intermediate"),
        )?;
        let output = init::linear(
            config.intermediate_size,
            config.hidden_size,
            std,
            vb.pp("output"),
        )?;
        Ok(Self {
            intermediate,
            output,
            activation: config.activation,
        })
    }

    /// Expands, activates, and contracts the hidden states.
    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let expanded = self.intermediate.forward(hidden)?;
        let activated = self.activation.forward(&expanded)?;
        self.output.forward(&activated)
    }
}
