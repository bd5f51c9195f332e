//! Activation catalogue for feed-forward stacks and task heads.
//!
//! The catalogue is closed: configurations refer to activations by name and
//! unknown names are rejected when the configuration is resolved, never at
//! call time. Every activation consumes tensors of any shape and returns the
//! same layout in the same dtype.

use candle_core::{Result, Tensor};
use candle_nn::ops;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const KNOWN_NAMES: &[&str] = &[
    "relu", "gelu", "gelu_new", "tanh", "sigmoid", "mish", "linear", "swish",
];

/// Error raised when a configuration names an activation outside the catalogue.
#[derive(Debug, Error)]
#[error("unknown activation `{name}`, expected one of {KNOWN_NAMES:?}")]
pub struct UnknownActivation {
    name: String,
}

/// Non-linearities available to encoder stacks and prediction heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    /// Erf-based GELU.
    Gelu,
    /// Tanh approximation of GELU used by the original BERT/GPT codebases.
    GeluNew,
    Tanh,
    Sigmoid,
    /// `x * tanh(softplus(x))`.
    Mish,
    /// Identity.
    Linear,
    /// `x * sigmoid(x)`, also known as SiLU.
    Swish,
}

impl Activation {
    /// Resolves a configuration name into a catalogue entry.
    pub fn from_name(name: &str) -> std::result::Result<Self, UnknownActivation> {
        match name {
            "relu" => Ok(Self::Relu),
            "gelu" => Ok(Self::Gelu),
            "gelu_new" => Ok(Self::GeluNew),
            "tanh" => Ok(Self::Tanh),
            "sigmoid" => Ok(Self::Sigmoid),
            "mish" => Ok(Self::Mish),
            "linear" => Ok(Self::Linear),
            "swish" => Ok(Self::Swish),
            other => Err(UnknownActivation {
                name: other.to_string(),
            }),
        }
    }

    /// The configuration name of this activation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::Gelu => "gelu",
            Self::GeluNew => "gelu_new",
            Self::Tanh => "tanh",
            Self::Sigmoid => "sigmoid",
            Self::Mish => "mish",
            Self::Linear => "linear",
            Self::Swish => "swish",
        }
    }

    /// Applies the activation element-wise.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        match self {
            Self::Relu => xs.relu(),
            Self::Gelu => xs.gelu_erf(),
            Self::GeluNew => xs.gelu(),
            Self::Tanh => xs.tanh(),
            Self::Sigmoid => ops::sigmoid(xs),
            Self::Mish => xs.mul(&softplus(xs)?.tanh()?),
            Self::Linear => Ok(xs.clone()),
            Self::Swish => xs.silu(),
        }
    }
}

/// Numerically stable softplus: `max(x, 0) + ln(1 + exp(-|x|))`.
fn softplus(xs: &Tensor) -> Result<Tensor> {
    let linear_part = xs.relu()?;
    let decay = xs.abs()?.neg()?.exp()?;
    linear_part.add(&(decay + 1.0)?.log()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn sample_input(device: &Device) -> Result<Tensor> {
        Tensor::from_slice(&[-3.0f32, -0.5, 0.0, 0.5, 3.0], (5,), device)
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = Activation::from_name("gleu").unwrap_err();
        assert!(err.to_string().contains("gleu"));
    }

    #[test]
    fn names_round_trip() {
        for name in [
            "relu", "gelu", "gelu_new", "tanh", "sigmoid", "mish", "linear", "swish",
        ] {
            let activation = Activation::from_name(name).unwrap();
            assert_eq!(activation.name(), name);
        }
    }

    #[test]
    fn gelu_new_matches_tanh_approximation() -> Result<()> {
        let device = Device::Cpu;
        let input = sample_input(&device)?;
        let output = Activation::GeluNew.forward(&input)?.to_vec1::<f32>()?;
        for (x, y) in input.to_vec1::<f32>()?.iter().zip(output.iter()) {
            let x = *x as f64;
            let inner = (2.0 / std::f64::consts::PI).sqrt() * (x + 0.044715 * x.powi(3));
            let expected = 0.5 * x * (1.0 + inner.tanh());
            assert!((expected - *y as f64).abs() < 1e-4, "gelu_new({x}) = {y}");
        }
        Ok(())
    }

    #[test]
    fn swish_is_input_times_sigmoid() -> Result<()> {
        let device = Device::Cpu;
        let input = sample_input(&device)?;
        let swish = Activation::Swish.forward(&input)?;
        let sigmoid = Activation::Sigmoid.forward(&input)?;
        let expected = input.mul(&sigmoid)?;
        let diff = swish.sub(&expected)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn mish_matches_reference_formula() -> Result<()> {
        let device = Device::Cpu;
        let input = sample_input(&device)?;
        let output = Activation::Mish.forward(&input)?.to_vec1::<f32>()?;
        for (x, y) in input.to_vec1::<f32>()?.iter().zip(output.iter()) {
            let x = *x as f64;
            let expected = x * x.exp().ln_1p().tanh();
            assert!((expected - *y as f64).abs() < 1e-5, "mish({x}) = {y}");
        }
        Ok(())
    }

    #[test]
    fn linear_is_identity_and_preserves_dtype() -> Result<()> {
        let device = Device::Cpu;
        let input = sample_input(&device)?;
        let output = Activation::Linear.forward(&input)?;
        assert_eq!(output.dtype(), DType::F32);
        let diff = output.sub(&input)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }
}
