//! Wire types for the Claude Code stream-json protocol.
//!
//! The CLI exchanges one JSON object per line in both directions. Output
//! objects carry a `type` discriminator; only `assistant`, `result`, `error`
//! and `stream_event` are interpreted, everything else decodes to
//! [`StreamMessage::Unknown`].

use serde::{Deserialize, Serialize};

/// A single content block inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text block.
    Text {
        /// The text of the block.
        text: String,
    },
    /// Any non-textual block (tool use, image, thinking, ...).
    #[serde(other)]
    Other,
}

/// Message content: either a plain string or a list of typed blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Resolve the content to its textual value.
    ///
    /// Block lists contribute only their text blocks, in order.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text),
                    ContentBlock::Other => None,
                })
                .collect(),
        }
    }

    /// Borrowing variant of [`MessageContent::into_text`].
    #[must_use]
    pub fn text(&self) -> String {
        self.clone().into_text()
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

impl From<serde_json::Value> for MessageContent {
    /// Coerce an arbitrary JSON value: strings stay text, arrays become
    /// blocks (entries that are not objects with a `type` count as
    /// non-textual), anything else becomes its JSON text.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => Self::Text(text),
            serde_json::Value::Array(items) => Self::Blocks(
                items
                    .into_iter()
                    .map(|item| serde_json::from_value(item).unwrap_or(ContentBlock::Other))
                    .collect(),
            ),
            other => Self::Text(other.to_string()),
        }
    }
}

/// Message body of an `assistant` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// End-of-turn `result` line.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default)]
    pub subtype: Option<String>,
    /// Final result text.
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    /// Total cost in USD.
    #[serde(default, alias = "total_cost_usd")]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub stop_reason: Option<String>,
}

/// Content delta types for partial message streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentDelta {
    /// Text content delta.
    TextDelta {
        /// The text fragment.
        text: String,
    },
    /// JSON input delta (for tool inputs).
    InputJsonDelta {
        /// Partial JSON string.
        partial_json: String,
    },
    /// Catch-all for unknown delta types.
    #[serde(other)]
    Unknown,
}

/// Metadata of a block announced by `content_block_start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<serde_json::Value>,
}

/// Inner event of a `stream_event` line (emitted with `--include-partial-messages`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartialEvent {
    MessageStart,
    ContentBlockStart {
        #[serde(default)]
        index: usize,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: usize,
        delta: ContentDelta,
    },
    ContentBlockStop,
    MessageDelta,
    MessageStop,
    #[serde(other)]
    Unknown,
}

/// One decoded line of stream-json output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Complete assistant message.
    Assistant { message: AssistantMessage },
    /// Final result of a turn.
    Result(ResultMessage),
    /// Error reported by the CLI.
    Error { error: String },
    /// Partial streaming event.
    StreamEvent { event: PartialEvent },
    /// Catch-all for `system`, `user` and future types.
    #[serde(other)]
    Unknown,
}

/// Body of a user input line.
#[derive(Debug, Serialize)]
struct UserBody<'a> {
    role: &'static str,
    content: &'a str,
}

/// Envelope written to the CLI's stdin for each user input.
#[derive(Debug, Serialize)]
struct UserEnvelope<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: UserBody<'a>,
}

/// Encode user input as one newline-terminated stream-json line.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_user_input(content: &str) -> Result<String, serde_json::Error> {
    let envelope = UserEnvelope {
        kind: "user",
        message: UserBody {
            role: "user",
            content,
        },
    };
    let mut line = serde_json::to_string(&envelope)?;
    line.push('\n');
    Ok(line)
}
