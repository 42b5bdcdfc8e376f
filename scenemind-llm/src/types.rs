//! Chat request and response types.

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions and persona.
    System,
    /// The prompt.
    User,
    /// A prior model turn.
    Assistant,
}

/// One message in a chat exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker.
    pub role: Role,
    /// Text.
    pub content: String,
}

impl ChatMessage {
    /// System message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A request to a chat model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Messages in order. A leading system message is hoisted for
    /// providers that take it separately.
    pub messages: Vec<ChatMessage>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Ask the provider for JSON output where supported.
    pub json_mode: bool,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
}

impl ChatRequest {
    /// A system + user request with reviewer-sized defaults.
    #[must_use]
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            max_tokens: 800,
            temperature: 0.8,
            json_mode: false,
            timeout_ms: 60_000,
        }
    }

    /// Request JSON output.
    #[must_use]
    pub fn with_json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Set sampling parameters.
    #[must_use]
    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// The system prompt, if the first message is one.
    #[must_use]
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    /// Messages after a leading system message.
    #[must_use]
    pub fn conversation(&self) -> &[ChatMessage] {
        match self.messages.first() {
            Some(m) if m.role == Role::System => &self.messages[1..],
            _ => &self.messages,
        }
    }
}

/// A chat model's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text.
    pub text: String,
    /// Tokens generated, when the provider reports it.
    pub tokens_generated: u32,
    /// Wall time of the successful attempt.
    pub latency_ms: u64,
    /// Model that answered.
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_split_from_conversation() {
        let req = ChatRequest::new("You are a critic.", "Read this.");
        assert_eq!(req.system_prompt(), Some("You are a critic."));
        assert_eq!(req.conversation(), &[ChatMessage::user("Read this.")]);
    }

    #[test]
    fn conversation_without_system() {
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            ..ChatRequest::new("", "")
        };
        assert!(req.system_prompt().is_none());
        assert_eq!(req.conversation().len(), 1);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::system("x")).expect("serialize");
        assert_eq!(json, r#"{"role":"system","content":"x"}"#);
    }
}
