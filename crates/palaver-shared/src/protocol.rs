//! JSON wire protocol exchanged between client and server.
//!
//! Every frame carries one JSON object with a `type` field; the enums here
//! are internally tagged so serde produces exactly that shape. Optional
//! response fields are omitted from the wire when absent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ChatInfo, ChatSummary, MessageRecord, MessageType, SecureMessage, UserData};

/// Requests sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Register {
        username: String,
        display_name: String,
        password: String,
    },
    Auth {
        username: String,
        password: String,
    },
    FindUser {
        display_name: String,
    },
    CreateChat {
        /// Peer user id; the caller is the other participant.
        user_id: i64,
    },
    GetChats,
    GetMessages {
        chat_id: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<u32>,
    },
    SendMessage {
        chat_id: i64,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
        #[serde(default)]
        message_type: MessageType,
    },
    CreateSecureChat {
        chat_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption_key: Option<String>,
    },
    JoinSecureChat {
        chat_key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption_key: Option<String>,
    },
    CloseSecureChat {
        chat_key: String,
    },
    AutoCloseSecureChat {
        chat_key: String,
    },
    ClearChatHistory,
    GetChatInfo {
        chat_id: i64,
    },
    ChangeDisplayName {
        new_display_name: String,
    },
    Disconnect,
}

/// Messages sent from server to client: one `*_response` per request type,
/// plus the `new_message` broadcast event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RegisterResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secret_phrase: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AuthResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_data: Option<UserData>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    FindUserResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_data: Option<UserData>,
    },
    CreateChatResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GetChatsResponse {
        chats: Vec<ChatSummary>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GetMessagesResponse {
        chat_id: i64,
        messages: Vec<MessageRecord>,
    },
    CreateSecureChatResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encryption_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    JoinSecureChatResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_key: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        participants_count: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        messages: Option<Vec<SecureMessage>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    CloseSecureChatResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    AutoCloseSecureChatResponse {
        success: bool,
    },
    ClearChatHistoryResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    GetChatInfoResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chat_info: Option<ChatInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ChangeDisplayNameResponse {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    NewMessage {
        chat_id: i64,
        sender_id: i64,
        sender_name: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
        message_type: MessageType,
        timestamp: DateTime<Utc>,
    },
}

impl ClientRequest {
    /// Serialize to the JSON text carried in one frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_type_tag() {
        let req = ClientRequest::Auth {
            username: "alice".into(),
            password: "pw".into(),
        };
        let json = req.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["username"], "alice");
    }

    #[test]
    fn unit_request_roundtrip() {
        let req = ClientRequest::from_json(r#"{"type":"get_chats"}"#).unwrap();
        assert_eq!(req, ClientRequest::GetChats);
    }

    #[test]
    fn message_type_defaults_to_normal() {
        let req = ClientRequest::from_json(
            r#"{"type":"send_message","chat_id":3,"content":"hi"}"#,
        )
        .unwrap();
        match req {
            ClientRequest::SendMessage { message_type, encrypted_content, .. } => {
                assert_eq!(message_type, MessageType::Normal);
                assert!(encrypted_content.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn absent_optionals_are_omitted_on_the_wire() {
        let msg = ServerMessage::RegisterResponse {
            success: false,
            secret_phrase: None,
            error: Some("username taken".into()),
        };
        let json = msg.to_json().unwrap();
        assert!(!json.contains("secret_phrase"));
        assert!(json.contains(r#""type":"register_response""#));
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        assert!(ClientRequest::from_json(r#"{"type":"launch_missiles"}"#).is_err());
    }
}
