use serde::{Deserialize, Serialize};

/// Message role in conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Identifier for the author of this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Set the author name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Token usage reported by the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Reason the model stopped generating tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    MaxTokens,
    Cancelled,
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serialization_skips_missing_name() {
        let value = serde_json::to_value(Message::user("What is Rust?")).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"role": "user", "content": "What is Rust?"})
        );

        let named = serde_json::to_value(Message::system("Be brief").with_name("ops")).unwrap();
        assert_eq!(named["name"], "ops");
        assert_eq!(named["role"], "system");
    }

    #[test]
    fn test_finish_reason_unknown_fallback() {
        let reason: FinishReason = serde_json::from_str("\"max_tokens\"").unwrap();
        assert_eq!(reason, FinishReason::MaxTokens);

        let reason: FinishReason = serde_json::from_str("\"something_new\"").unwrap();
        assert_eq!(reason, FinishReason::Unknown);
    }
}
