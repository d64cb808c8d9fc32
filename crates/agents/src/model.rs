use async_trait::async_trait;

use nexza_common::Role;

// ── Typed chat messages ─────────────────────────────────────────────────────

/// Message sent to the completion service.
///
/// Only carries what the wire format needs; session timestamps and
/// channel metadata never reach the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
        }
    }

    /// History turn to message.
    pub fn from_turn(role: Role, text: impl Into<String>) -> Self {
        match role {
            Role::User => Self::user(text),
            Role::Assistant => Self::assistant(text),
        }
    }

    #[must_use]
    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        match self {
            Self::System { content } | Self::User { content } | Self::Assistant { content } => {
                content
            },
        }
    }

    /// OpenAI Chat Completions message object.
    #[must_use]
    pub fn to_openai_value(&self) -> serde_json::Value {
        serde_json::json!({ "role": self.role(), "content": self.content() })
    }
}

// ── Provider trait ──────────────────────────────────────────────────────────

/// A completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier sent with each request.
    fn id(&self) -> &str;

    /// Endpoint shown in diagnostics.
    fn endpoint(&self) -> &str {
        ""
    }

    async fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<CompletionResponse>;
}

#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub usage: Usage,
}

impl CompletionResponse {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            usage: Usage::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
