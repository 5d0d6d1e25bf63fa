//! Generation error types.

use std::path::PathBuf;

use kjarni_tokenizers::TokenizerError;
use thiserror::Error;

/// Errors raised while building or running a generation engine.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// A generation setting is out of range or required metadata is missing.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model's `config.json` could not be read or parsed.
    #[error("Invalid model config '{}': {reason}", path.display())]
    ModelConfig { path: PathBuf, reason: String },

    /// Tokenizer construction or encoding failed.
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    /// A forward pass (or opening/closing a backend) failed.
    #[error("Backend failure during {stage}: {source}")]
    Backend {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The session was driven out of order, e.g. `decode` before `prefill`.
    #[error("Session error: {0}")]
    Session(String),

    /// The engine or session has already been closed.
    #[error("Engine is closed")]
    Closed,
}

impl GenerationError {
    pub(crate) fn backend(stage: &'static str, source: anyhow::Error) -> Self {
        GenerationError::Backend { stage, source }
    }
}

/// Result type for generation operations.
pub type Result<T> = std::result::Result<T, GenerationError>;
