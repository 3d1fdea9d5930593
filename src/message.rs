//! Chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a [`ChatMessage`].
///
/// Serialized as the label shown in the rendered bubble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Text the user submitted.
    User,
    /// Reply streamed back from the chatbot service.
    Agent,
    /// A failed exchange, rendered so the user learns about it.
    Error,
}

impl Role {
    /// Lowercase name used for CSS hooks and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Error => "error",
        }
    }
}

/// One entry in the displayed conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Creation time. Never changes after construction.
    pub timestamp: DateTime<Utc>,
    /// Exchange this message belongs to. `None` for user messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<Uuid>,
    /// Set on an agent placeholder until its exchange finishes.
    #[serde(default)]
    pub streaming: bool,
}

impl ChatMessage {
    /// A finalized user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            exchange_id: None,
            streaming: false,
        }
    }

    /// An empty agent placeholder owned by `exchange_id`.
    #[must_use]
    pub fn agent_placeholder(exchange_id: Uuid) -> Self {
        Self {
            role: Role::Agent,
            content: String::new(),
            timestamp: Utc::now(),
            exchange_id: Some(exchange_id),
            streaming: true,
        }
    }

    /// An error note for a failed exchange.
    #[must_use]
    pub fn error(exchange_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            role: Role::Error,
            content: content.into(),
            timestamp: Utc::now(),
            exchange_id: Some(exchange_id),
            streaming: false,
        }
    }

    /// Whether this is a streaming agent message still waiting for its first bytes.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.role == Role::Agent && self.streaming && self.content.is_empty()
    }
}
