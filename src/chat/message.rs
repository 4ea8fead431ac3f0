//! Chat message value type.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open key/value metadata attached to a message.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Assistant,
    User,
    System,
}

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Error,
    ToolUse,
}

/// A finalized chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a text message with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(session_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            session_id: session_id.into(),
            role,
            content: content.into(),
            message_type: MessageType::Text,
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    /// Returns true if the content is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// Generate a message id of the form `msg-<unix-millis>-<8 hex digits>`.
#[must_use]
pub fn generate_message_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis());
    let suffix = Uuid::new_v4().simple().to_string();
    format!("msg-{millis}-{}", &suffix[..8])
}
