//! Tokenizer error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while building a tokenizer or encoding text.
///
/// Decoding never fails: unknown ids decode to the empty string.
#[derive(Debug, Error)]
pub enum TokenizerError {
    /// A tokenizer file could not be read.
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A tokenizer file was readable but its JSON could not be parsed.
    #[error("Failed to parse '{source_name}': {source}")]
    Json {
        source_name: String,
        #[source]
        source: serde_json::Error,
    },

    /// A vocabulary, merge or score table is structurally invalid.
    #[error("Malformed tokenizer data in '{source_name}': {reason}")]
    Malformed { source_name: String, reason: String },

    /// Two distinct token strings were assigned the same id.
    #[error("Token id {id} is assigned to both '{first}' and '{second}'")]
    DuplicateId { id: u32, first: String, second: String },

    /// The pre-tokenization pattern failed to compile.
    #[error("Invalid pre-tokenization pattern: {0}")]
    Regex(#[from] fancy_regex::Error),

    /// A token required by the configuration is absent from the vocabulary.
    #[error("Token '{0}' is not in the vocabulary")]
    MissingToken(String),

    /// The tokenizer file describes a model this crate does not implement.
    #[error("Unsupported tokenizer: {0}")]
    Unsupported(String),
}

impl TokenizerError {
    pub(crate) fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        TokenizerError::Malformed {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for tokenizer operations.
pub type Result<T> = std::result::Result<T, TokenizerError>;
