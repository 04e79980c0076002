//! Domain types carried over the wire and returned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Normal,
    Secure,
}

/// Kind of a chat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Secure,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Private => "private",
            ChatType::Secure => "secure",
        }
    }
}

impl std::str::FromStr for ChatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ChatType::Private),
            "secure" => Ok(ChatType::Secure),
            other => Err(format!("unknown chat type: {other}")),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(MessageType::Normal),
            "secure" => Ok(MessageType::Secure),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Normal => "normal",
            MessageType::Secure => "secure",
        }
    }
}

/// Public view of a user, as returned by `auth` and `find_user`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserData {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
}

/// One entry in a user's chat list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSummary {
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub created_at: DateTime<Utc>,
    pub message_count: i64,
    pub last_message: Option<String>,
    /// Participant display names joined by ", ", excluding the caller.
    pub chat_name: String,
}

/// A stored chat message joined with its sender's display name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: i64,
    pub sender_id: i64,
    pub content: String,
    pub encrypted_content: Option<String>,
    pub message_type: MessageType,
    pub created_at: DateTime<Utc>,
    pub sender_name: String,
}

/// A secure-chat message as returned by `join_secure_chat` (decrypted
/// server-side when possible, chronological order).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecureMessage {
    pub content: String,
    pub sender: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata for one secure-chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SecureSession {
    pub chat_id: i64,
    pub chat_key: String,
    pub encryption_key: String,
    pub session_id: String,
}

/// Chat metadata returned by `get_chat_info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatInfo {
    pub chat_id: i64,
    pub chat_type: ChatType,
    pub created_at: DateTime<Utc>,
    pub chat_name: String,
}
