//! Self-attention blocks for the transformer model families.
//!
//! Both variants operate on hidden states with layout `(batch, seq, hidden)`
//! and return the residual-normalised output together with the post-mask,
//! pre-softmax attention scores shaped `(batch, heads, seq, seq)`. Masks are
//! additive: zero where attention is allowed, a large negative value where it
//! is suppressed, broadcastable to the score layout.

pub mod config;
pub mod error;
pub mod masks;
pub mod relative;
pub mod standard;

pub use config::AttentionConfig;
pub use error::AttentionError;
pub use relative::RelativeSelfAttention;
pub use standard::SelfAttention;
