// backend/src/models/chats.rs
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Closed set of roles accepted in caller-supplied history.
///
/// The wire format carries roles as plain strings (`ApiChatMessage`); they
/// are validated into this enum when a session is opened. Anything outside
/// `user`/`assistant` is rejected rather than coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl TryFrom<&str> for MessageRole {
    type Error = AppError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(AppError::HistoryFormatError(format!(
                "unknown role '{}', expected 'user' or 'assistant'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{role, content}` entry of caller-supplied history, as it arrives on
/// the wire. Role validation happens in `services::chat::open_session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiChatMessage {
    pub role: String,
    pub content: String,
}

/// Request body for `POST /chat/stream`.
///
/// The caller owns persistence: `history` is whatever it has stored for the
/// conversation so far, and `session_id` is an opaque correlation id that is
/// logged but never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ApiChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}
