//! Chat prompt templates.

pub mod chatml;
pub mod llama3;
pub mod mistral;
pub mod templates;

pub use chatml::ChatMLTemplate;
pub use llama3::Llama3ChatTemplate;
pub use mistral::MistralChatTemplate;
pub use templates::{ChatTemplate, Conversation, FnTemplate, Message, RawTemplate, Role};
