//! Transformer model families assembled from the shared layer crates.
//!
//! Each family couples the embedding block with an encoder stack and the
//! task heads the architecture ships with: DistilBERT and ELECTRA use
//! standard self-attention with learned absolute positions, NeZha swaps in
//! relative-position attention. All models share one flat [`ModelConfig`]
//! passed by reference to every constructor.

pub mod config;
pub mod distilbert;
pub mod electra;
pub mod encoder;
pub mod nezha;
pub mod pooler;

pub use config::ModelConfig;
pub use encoder::{Encoder, EncoderOutput};
pub use pooler::Pooler;
