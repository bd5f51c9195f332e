//! Building blocks shared by the transformer model crates.
//!
//! This crate hosts the pieces every encoder stack needs regardless of model
//! family: the closed activation catalogue, the position-wise feed-forward
//! block, parameter construction helpers, loss utilities for the pretraining
//! objectives, and small shape-validation routines.

pub mod activations;
pub mod checks;
pub mod feed_forward;
pub mod init;
pub mod loss;

pub use activations::{Activation, UnknownActivation};
pub use feed_forward::{FeedForward, FeedForwardConfig};
