use super::templates::{ChatTemplate, Conversation, Role};

/// Mistral Instruct Template (v0.1, v0.2, v0.3)
///
/// Format:
/// <s>[INST] {system}\n\n{user} [/INST] {assistant}</s>[INST] {user} [/INST]
#[derive(Clone, Debug)]
pub struct MistralChatTemplate {
    pub add_bos: bool,
}

impl Default for MistralChatTemplate {
    fn default() -> Self {
        Self::new()
    }
}

impl MistralChatTemplate {
    pub fn new() -> Self {
        Self { add_bos: true }
    }
}

impl ChatTemplate for MistralChatTemplate {
    fn apply(&self, conversation: &Conversation) -> String {
        let mut prompt = String::new();
        let messages = conversation.messages();

        if messages.is_empty() {
            return prompt;
        }

        if self.add_bos {
            prompt.push_str("<s>");
        }

        // Mistral merges the system prompt into the first user message.
        let (mut system, rest) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => (Some(first.content.as_str()), rest),
            _ => (None, messages),
        };

        for msg in rest {
            match msg.role {
                Role::User => {
                    prompt.push_str("[INST] ");
                    if let Some(sys) = system.take() {
                        prompt.push_str(sys);
                        prompt.push_str("\n\n");
                    }
                    prompt.push_str(&msg.content);
                    prompt.push_str(" [/INST]");
                }
                Role::Assistant => {
                    prompt.push(' ');
                    prompt.push_str(&msg.content);
                    prompt.push_str("</s>");
                }
                // Later system messages have no slot in this format.
                Role::System => {}
            }
        }

        prompt
    }

    fn stop_sequences(&self) -> Vec<String> {
        vec!["</s>".to_string()]
    }
}
