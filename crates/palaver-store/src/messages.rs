//! Message persistence and retrieval.

use chrono::Utc;
use rusqlite::params;

use palaver_shared::types::{MessageRecord, MessageType};

use crate::database::{format_timestamp, parse_timestamp, Database};
use crate::error::Result;

impl Database {
    /// Persist one message. Returns its row id.
    pub fn save_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        content: &str,
        encrypted_content: Option<&str>,
        message_type: MessageType,
    ) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO messages (chat_id, sender_id, content, encrypted_content, message_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                chat_id,
                sender_id,
                content,
                encrypted_content,
                message_type.as_str(),
                format_timestamp(Utc::now()),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Fetch up to `limit` messages of a chat, newest first, joined with
    /// the sender's display name.
    pub fn get_chat_messages(&self, chat_id: i64, limit: u32) -> Result<Vec<MessageRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, m.sender_id, m.content, m.encrypted_content, m.message_type,
                    m.created_at, u.display_name
             FROM messages m
             JOIN users u ON m.sender_id = u.id
             WHERE m.chat_id = ?1
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![chat_id, limit], |row| {
            let message_type: String = row.get(4)?;
            let created_at: String = row.get(5)?;
            Ok(MessageRecord {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                content: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                encrypted_content: row.get(3)?,
                message_type: message_type.parse().unwrap_or_default(),
                created_at: parse_timestamp(&created_at)?,
                sender_name: row.get(6)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}
