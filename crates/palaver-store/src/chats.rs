//! Chat creation, listing, naming, and history cleanup.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};

use palaver_shared::types::{ChatInfo, ChatSummary, ChatType};

use crate::database::{format_timestamp, parse_timestamp, Database};
use crate::error::Result;

impl Database {
    /// Find the private chat between two users, creating it when absent.
    ///
    /// Idempotent and order-blind: `(a, b)` and `(b, a)` resolve to the
    /// same chat id. Runs in a single transaction so concurrent calls
    /// cannot create duplicate private chats.
    pub fn get_or_create_private_chat(&mut self, user_a: i64, user_b: i64) -> Result<i64> {
        let tx = self.conn_mut().transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT c.id FROM chats c
                 JOIN chat_participants p1 ON c.id = p1.chat_id
                 JOIN chat_participants p2 ON c.id = p2.chat_id
                 WHERE c.chat_type = 'private'
                   AND p1.user_id = ?1 AND p2.user_id = ?2",
                params![user_a, user_b],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(chat_id) = existing {
            tx.commit()?;
            return Ok(chat_id);
        }

        let chat_id = insert_chat(&tx, ChatType::Private, &[user_a, user_b])?;
        tx.commit()?;
        Ok(chat_id)
    }

    /// List a user's chats, newest first.
    pub fn get_user_chats(&self, user_id: i64) -> Result<Vec<ChatSummary>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.id, c.chat_type, c.created_at
             FROM chats c
             JOIN chat_participants cp ON c.id = cp.chat_id
             WHERE cp.user_id = ?1
             ORDER BY c.created_at DESC, c.id DESC",
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            let id: i64 = row.get(0)?;
            let chat_type: String = row.get(1)?;
            let created_at: String = row.get(2)?;
            Ok((id, chat_type, created_at))
        })?;

        let mut chats = Vec::new();
        for row in rows {
            let (chat_id, chat_type, created_at) = row?;

            let message_count: i64 = self.conn().query_row(
                "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
                params![chat_id],
                |row| row.get(0),
            )?;

            let last_message: Option<String> = self
                .conn()
                .query_row(
                    "SELECT content FROM messages WHERE chat_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    params![chat_id],
                    |row| row.get(0),
                )
                .optional()?;

            chats.push(ChatSummary {
                chat_id,
                chat_type: chat_type
                    .parse()
                    .unwrap_or(ChatType::Private),
                created_at: parse_timestamp(&created_at)?,
                message_count,
                last_message,
                chat_name: self.chat_name_for(chat_id, user_id)?,
            });
        }
        Ok(chats)
    }

    /// Chat metadata, only when `user_id` participates in the chat.
    pub fn get_chat_info(&self, user_id: i64, chat_id: i64) -> Result<Option<ChatInfo>> {
        let row: Option<(String, String)> = self
            .conn()
            .query_row(
                "SELECT c.chat_type, c.created_at
                 FROM chats c
                 JOIN chat_participants cp ON c.id = cp.chat_id
                 WHERE c.id = ?1 AND cp.user_id = ?2",
                params![chat_id, user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((chat_type, created_at)) = row else {
            return Ok(None);
        };

        Ok(Some(ChatInfo {
            chat_id,
            chat_type: chat_type.parse().unwrap_or(ChatType::Private),
            created_at: parse_timestamp(&created_at)?,
            chat_name: self.chat_name_for(chat_id, user_id)?,
        }))
    }

    /// True when the user is a participant of the chat.
    pub fn is_chat_participant(&self, user_id: i64, chat_id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT id FROM chat_participants WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Participant user ids of a chat.
    pub fn chat_participants(&self, chat_id: i64) -> Result<Vec<i64>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM chat_participants WHERE chat_id = ?1")?;
        let rows = stmt.query_map(params![chat_id], |row| row.get(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Delete every message in every chat the user participates in.
    ///
    /// Scoped strictly to the caller's chats; accounts and chat rows are
    /// untouched.
    pub fn clear_user_chat_history(&self, user_id: i64) -> Result<()> {
        self.conn().execute(
            "DELETE FROM messages WHERE chat_id IN (
                 SELECT chat_id FROM chat_participants WHERE user_id = ?1
             )",
            params![user_id],
        )?;
        Ok(())
    }

    /// Display names of the other participants joined by ", ", with a
    /// `Chat {id}` fallback when there are none.
    fn chat_name_for(&self, chat_id: i64, user_id: i64) -> Result<String> {
        let mut stmt = self.conn().prepare(
            "SELECT u.display_name FROM chat_participants cp
             JOIN users u ON cp.user_id = u.id
             WHERE cp.chat_id = ?1 AND cp.user_id != ?2
             ORDER BY u.display_name",
        )?;
        let rows = stmt.query_map(params![chat_id, user_id], |row| row.get::<_, String>(0))?;

        let mut names = Vec::new();
        for row in rows {
            names.push(row?);
        }

        if names.is_empty() {
            Ok(format!("Chat {chat_id}"))
        } else {
            Ok(names.join(", "))
        }
    }
}

/// Insert a chat row plus its participant rows inside an open transaction.
pub(crate) fn insert_chat(
    tx: &Transaction<'_>,
    chat_type: ChatType,
    participants: &[i64],
) -> Result<i64> {
    tx.execute(
        "INSERT INTO chats (chat_type, created_at) VALUES (?1, ?2)",
        params![chat_type.as_str(), format_timestamp(Utc::now())],
    )?;
    let chat_id = tx.last_insert_rowid();

    for user_id in participants {
        tx.execute(
            "INSERT OR IGNORE INTO chat_participants (chat_id, user_id) VALUES (?1, ?2)",
            params![chat_id, user_id],
        )?;
    }
    Ok(chat_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_shared::types::MessageType;

    fn db_with_users() -> (tempfile::TempDir, Database, i64, i64) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        db.register_user("alice", "alice", "pw").unwrap();
        db.register_user("bob", "bob", "pw").unwrap();
        let a = db.authenticate_user("alice", "pw").unwrap().user_id;
        let b = db.authenticate_user("bob", "pw").unwrap().user_id;
        (dir, db, a, b)
    }

    #[test]
    fn private_chat_is_idempotent_and_order_blind() {
        let (_dir, mut db, a, b) = db_with_users();
        let first = db.get_or_create_private_chat(a, b).unwrap();
        let second = db.get_or_create_private_chat(a, b).unwrap();
        let reversed = db.get_or_create_private_chat(b, a).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, reversed);
    }

    #[test]
    fn chat_name_excludes_caller() {
        let (_dir, mut db, a, b) = db_with_users();
        let chat = db.get_or_create_private_chat(a, b).unwrap();

        let alice_view = db.get_user_chats(a).unwrap();
        assert_eq!(alice_view.len(), 1);
        assert_eq!(alice_view[0].chat_id, chat);
        assert_eq!(alice_view[0].chat_name, "bob");

        let bob_view = db.get_user_chats(b).unwrap();
        assert_eq!(bob_view[0].chat_name, "alice");
    }

    #[test]
    fn chat_summary_counts_and_last_message() {
        let (_dir, mut db, a, b) = db_with_users();
        let chat = db.get_or_create_private_chat(a, b).unwrap();
        db.save_message(chat, a, "first", None, MessageType::Normal)
            .unwrap();
        db.save_message(chat, b, "second", None, MessageType::Normal)
            .unwrap();

        let chats = db.get_user_chats(a).unwrap();
        assert_eq!(chats[0].message_count, 2);
        assert_eq!(chats[0].last_message.as_deref(), Some("second"));
    }

    #[test]
    fn chat_info_requires_membership() {
        let (_dir, mut db, a, b) = db_with_users();
        db.register_user("carol", "carol", "pw").unwrap();
        let c = db.authenticate_user("carol", "pw").unwrap().user_id;

        let chat = db.get_or_create_private_chat(a, b).unwrap();
        assert!(db.get_chat_info(a, chat).unwrap().is_some());
        assert!(db.get_chat_info(c, chat).unwrap().is_none());

        assert!(db.is_chat_participant(a, chat).unwrap());
        assert!(!db.is_chat_participant(c, chat).unwrap());
    }

    #[test]
    fn clear_history_is_scoped_to_own_chats() {
        let (_dir, mut db, a, b) = db_with_users();
        db.register_user("carol", "carol", "pw").unwrap();
        db.register_user("dave", "dave", "pw").unwrap();
        let c = db.authenticate_user("carol", "pw").unwrap().user_id;
        let d = db.authenticate_user("dave", "pw").unwrap().user_id;

        let ab = db.get_or_create_private_chat(a, b).unwrap();
        let cd = db.get_or_create_private_chat(c, d).unwrap();
        db.save_message(ab, a, "hi bob", None, MessageType::Normal)
            .unwrap();
        db.save_message(cd, c, "hi dave", None, MessageType::Normal)
            .unwrap();

        db.clear_user_chat_history(a).unwrap();

        assert!(db.get_chat_messages(ab, 50).unwrap().is_empty());
        assert_eq!(db.get_chat_messages(cd, 50).unwrap().len(), 1);
    }
}
