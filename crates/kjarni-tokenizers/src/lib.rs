//! Subword tokenizers for autoregressive generation.
//!
//! Three algorithms share one contract ([`Tokenizer`]) and one streaming
//! decoder contract ([`TokenDecoder`]):
//!
//! - [`ByteLevelBpe`]: GPT-2 style byte-level BPE
//! - [`SentencePieceBpe`]: SentencePiece-style BPE with byte fallback
//! - [`Unigram`]: Viterbi segmentation over scored pieces

pub mod added;
pub mod any;
pub mod bpe;
pub mod bytes;
pub mod encoding;
pub mod error;
pub mod loader;
mod merge;
pub mod options;
pub mod pieces;
pub mod sentencepiece;
pub mod traits;
pub mod unigram;
pub mod vocab;

pub use added::{AddedToken, AddedTokens};
pub use any::AnyTokenizer;
pub use bpe::{ByteLevelBpe, GPT2_PATTERN};
pub use encoding::EncodedInput;
pub use error::{Result, TokenizerError};
pub use loader::{from_json_str, load_tokenizer};
pub use options::TokenizerOptions;
pub use pieces::{PrependScheme, SPACE_MARKER};
pub use sentencepiece::{MergePriority, SentencePieceBpe};
pub use traits::{TokenDecoder, Tokenizer};
pub use unigram::Unigram;
pub use vocab::Vocabulary;
