//! Autoregressive text generation over an opaque forward-pass backend.
//!
//! [`GenerationEngine`] ties together a tokenizer from `kjarni-tokenizers`,
//! a [`GenerativeSession`] (decoder-only or encoder-decoder, each owning its
//! key/value caches) and a [`Sampler`]. Text is streamed fragment by fragment
//! through a callback or a lazy [`GenerationStream`].

pub mod cache;
pub mod chat;
pub mod common;
pub mod engine;
pub mod error;
pub mod loader;
pub mod model_config;
pub mod ops;
pub mod session;
pub mod tensor;

pub use chat::{ChatTemplate, Conversation, Message, Role};
pub use common::{GenerationConfig, GenerationConfigBuilder, Sampler};
pub use engine::{GenerationEngine, GenerationResult, GenerationStream, StopReason};
pub use error::{GenerationError, Result};
pub use loader::load_engine;
pub use model_config::{KvLayout, ModelConfig};
pub use session::{AnySession, DecoderOnlySession, EncoderDecoderSession, GenerativeSession};
pub use tensor::{BackendFactory, BackendRole, ForwardBackend, Tensor, TensorMap};

#[cfg(test)]
pub mod tests;
