use super::templates::{ChatTemplate, Conversation};

/// ChatML Template (Used by Qwen 2/2.5, Yi, etc.)
///
/// Format:
/// <|im_start|>system
/// {content}<|im_end|>
/// <|im_start|>user
/// {content}<|im_end|>
/// <|im_start|>assistant
#[derive(Clone, Debug)]
pub struct ChatMLTemplate {
    pub add_generation_prompt: bool,
}

impl Default for ChatMLTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatMLTemplate {
    pub const IM_START: &'static str = "<|im_start|>";
    pub const IM_END: &'static str = "<|im_end|>";

    pub fn new() -> Self {
        Self { add_generation_prompt: true }
    }
}

impl ChatTemplate for ChatMLTemplate {
    fn apply(&self, conversation: &Conversation) -> String {
        let mut prompt = String::new();

        for message in conversation.messages() {
            prompt.push_str(Self::IM_START);
            prompt.push_str(message.role.as_str());
            prompt.push('\n');
            prompt.push_str(&message.content);
            prompt.push_str(Self::IM_END);
            prompt.push('\n');
        }

        if self.add_generation_prompt {
            prompt.push_str(Self::IM_START);
            prompt.push_str("assistant\n");
        }

        prompt
    }

    fn stop_sequences(&self) -> Vec<String> {
        vec![Self::IM_END.to_string(), "<|endoftext|>".to_string()]
    }

    fn default_system_prompt(&self) -> Option<&str> {
        Some("You are a helpful assistant.")
    }
}
