//! Chat conversation types and templates
//!
//! A template turns a conversation (or a single user message) into the
//! marked-up prompt string a chat model was trained on.

use std::fmt;
use std::sync::Arc;

/// A role in a conversation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// System instructions (sets behavior)
    System,
    /// User messages (human input)
    User,
    /// Assistant responses (model output)
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A conversation history
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation with a system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The leading system message, if any
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Clear all messages (optionally keep system prompt)
    pub fn clear(&mut self, keep_system: bool) {
        let system = if keep_system {
            self.system_prompt().map(str::to_string)
        } else {
            None
        };
        self.messages.clear();
        if let Some(system) = system {
            self.messages.push(Message::system(system));
        }
    }

    /// Count messages (excluding system)
    pub fn turn_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role != Role::System).count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}

/// Formats conversations into model-specific prompts.
///
/// Implementations must be pure: the same conversation always renders to the
/// same prompt.
pub trait ChatTemplate: Send + Sync {
    /// Format a conversation into a prompt string for the model
    fn apply(&self, conversation: &Conversation) -> String;

    /// Format a single user turn.
    fn render(&self, user_text: &str) -> String {
        let mut conversation = Conversation::new();
        conversation.push_user(user_text);
        self.apply(&conversation)
    }

    /// Literal strings that end an assistant response
    fn stop_sequences(&self) -> Vec<String> {
        vec![]
    }

    fn default_system_prompt(&self) -> Option<&str> {
        None
    }

    /// Check that a conversation is well-formed for this template
    fn validate(&self, _conversation: &Conversation) -> Result<(), String> {
        Ok(())
    }
}

/// A no-op template that just concatenates messages (for base models)
#[derive(Clone, Debug, Default)]
pub struct RawTemplate;

impl ChatTemplate for RawTemplate {
    fn apply(&self, conversation: &Conversation) -> String {
        conversation
            .messages()
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn render(&self, user_text: &str) -> String {
        user_text.to_string()
    }
}

type RenderFn = dyn Fn(&str) -> String + Send + Sync;

/// Wraps a plain `text -> prompt` function.
///
/// Conversations render through the function applied to the last user message.
#[derive(Clone)]
pub struct FnTemplate {
    render: Arc<RenderFn>,
    stop_sequences: Vec<String>,
}

impl FnTemplate {
    pub fn new(render: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self {
            render: Arc::new(render),
            stop_sequences: Vec::new(),
        }
    }

    pub fn with_stop_sequences<I, S>(mut self, stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_sequences = stops.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Debug for FnTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTemplate")
            .field("stop_sequences", &self.stop_sequences)
            .finish_non_exhaustive()
    }
}

impl ChatTemplate for FnTemplate {
    fn apply(&self, conversation: &Conversation) -> String {
        let last_user = conversation
            .messages()
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        (self.render)(last_user)
    }

    fn render(&self, user_text: &str) -> String {
        (self.render)(user_text)
    }

    fn stop_sequences(&self) -> Vec<String> {
        self.stop_sequences.clone()
    }
}
