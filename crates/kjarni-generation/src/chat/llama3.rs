//! Llama 3 Instruct chat template

use super::templates::{ChatTemplate, Conversation, Role};

/// Chat template for Llama 3 Instruct models
///
/// Format:
/// ```text
/// <|begin_of_text|><|start_header_id|>system<|end_header_id|>
///
/// {system_message}<|eot_id|><|start_header_id|>user<|end_header_id|>
///
/// {user_message}<|eot_id|><|start_header_id|>assistant<|end_header_id|>
///
/// ```
#[derive(Clone, Debug)]
pub struct Llama3ChatTemplate {
    /// Whether to add <|begin_of_text|> at the start
    pub add_bos: bool,
    /// Whether to add the assistant header at the end (for generation)
    pub add_generation_prompt: bool,
}

impl Default for Llama3ChatTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl Llama3ChatTemplate {
    const BEGIN_OF_TEXT: &'static str = "<|begin_of_text|>";
    const END_OF_TEXT: &'static str = "<|end_of_text|>";
    const START_HEADER: &'static str = "<|start_header_id|>";
    const END_HEADER: &'static str = "<|end_header_id|>";
    const EOT: &'static str = "<|eot_id|>";

    pub fn new() -> Self {
        Self {
            add_bos: true,
            add_generation_prompt: true,
        }
    }

    fn push_header(prompt: &mut String, role: &Role) {
        prompt.push_str(Self::START_HEADER);
        prompt.push_str(role.as_str());
        prompt.push_str(Self::END_HEADER);
        prompt.push_str("\n\n");
    }
}

impl ChatTemplate for Llama3ChatTemplate {
    fn apply(&self, conversation: &Conversation) -> String {
        let mut prompt = String::new();

        if self.add_bos {
            prompt.push_str(Self::BEGIN_OF_TEXT);
        }

        for message in conversation.messages() {
            Self::push_header(&mut prompt, &message.role);
            prompt.push_str(&message.content);
            prompt.push_str(Self::EOT);
        }

        if self.add_generation_prompt {
            Self::push_header(&mut prompt, &Role::Assistant);
        }

        prompt
    }

    fn stop_sequences(&self) -> Vec<String> {
        vec![Self::EOT.to_string(), Self::END_OF_TEXT.to_string()]
    }

    fn validate(&self, conversation: &Conversation) -> Result<(), String> {
        let messages = conversation.messages();
        if messages.is_empty() {
            return Err("Conversation is empty".to_string());
        }

        let start_idx = usize::from(messages[0].role == Role::System);
        let mut expect_user = true;

        for (i, msg) in messages.iter().enumerate().skip(start_idx) {
            match (&msg.role, expect_user) {
                (Role::User, true) => expect_user = false,
                (Role::Assistant, false) => expect_user = true,
                (Role::System, _) => {
                    return Err("System message can only appear at the start".to_string());
                }
                (role, _) => {
                    let expected = if expect_user { "user" } else { "assistant" };
                    return Err(format!(
                        "Expected {} message at position {}, got {}",
                        expected, i, role
                    ));
                }
            }
        }

        Ok(())
    }
}
