use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

pub const MAX_PROMPT_CHARS: usize = 100;

/// Body of `POST /api/chat` and `POST /api/chat/stream`, before validation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatReqInput {
    pub prompt: String,
    #[serde(rename = "conversationId")]
    pub conversation_id: String,
}

/// A request that passed validation. The prompt is already trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub prompt: String,
    pub conversation_id: String,
}

impl ChatReqInput {
    pub fn validate(self) -> Result<ChatMessage, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let prompt = self.prompt.trim();
        let prompt_chars = prompt.chars().count();
        if prompt_chars == 0 {
            errors.add("prompt", "Prompt is required");
        } else if prompt_chars > MAX_PROMPT_CHARS {
            errors.add(
                "prompt",
                format!("Prompt is too long (max {} characters)", MAX_PROMPT_CHARS),
            );
        }

        if !is_hyphenated_uuid(&self.conversation_id) {
            errors.add("conversationId", "Invalid UUID");
        }

        if !errors.is_empty() {
            return Err(errors);
        }
        Ok(ChatMessage {
            prompt: prompt.to_string(),
            conversation_id: self.conversation_id,
        })
    }
}

fn is_hyphenated_uuid(value: &str) -> bool {
    // Uuid::parse_str also takes the simple, braced and urn forms
    value.len() == 36 && Uuid::parse_str(value).is_ok()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRespOutput {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorOutput {
    pub error: String,
}

/// Field name to messages, serialized as `{"errors": {"prompt": ["..."]}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    /// Error for a body that could not be decoded at all.
    pub fn body(message: impl Into<String>) -> Self {
        let mut errors = Self::default();
        errors.add("body", message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.errors.get(field).map(Vec::as_slice)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .errors
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join("; "))
    }
}
