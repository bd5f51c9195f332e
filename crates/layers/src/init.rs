//! Parameter construction helpers.
//!
//! Weight initialisation is performed by free functions invoked during model
//! assembly rather than by a hook inherited from a base class: dense and
//! embedding weights are drawn from `N(0, std)` with the configured
//! initializer range, biases start at zero, and layer-norm parameters start
//! at scale one and bias zero.

use candle_core::Result;
use candle_nn::init::Init;
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};

/// Builds a dense projection with normally initialised weights and zero bias.
pub fn linear(in_dim: usize, out_dim: usize, std: f64, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: std,
        },
    )?;
    let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Builds a dense projection without a bias vector.
pub fn linear_no_bias(in_dim: usize, out_dim: usize, std: f64, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: std,
        },
    )?;
    Ok(Linear::new(weight, None))
}

/// Builds an embedding table with normally initialised rows.
pub fn embedding(size: usize, dim: usize, std: f64, vb: VarBuilder) -> Result<Embedding> {
    let weight = vb.get_with_hints(
        (size, dim),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: std,
        },
    )?;
    Ok(Embedding::new(weight, dim))
}

/// Builds a layer norm with unit scale and zero bias.
pub fn layer_norm(size: usize, eps: f64, vb: VarBuilder) -> Result<LayerNorm> {
    let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
    let bias = vb.get_with_hints(size, "bias", Init::Const(0.0))?;
    Ok(LayerNorm::new(weight, bias, eps))
}
