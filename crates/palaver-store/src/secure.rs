//! Secure chat sessions: key-gated ephemeral chats whose messages are
//! deleted on close.
//!
//! Sessions are indexed by the human-chosen chat key. The key is UNIQUE at
//! the schema level, so racing creations have exactly one winner.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use palaver_shared::crypto;
use palaver_shared::types::{ChatType, MessageType, SecureMessage, SecureSession};

use crate::chats::insert_chat;
use crate::database::{format_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::users::is_unique_violation;

impl Database {
    /// Create a secure chat session for `chat_key`.
    ///
    /// Generates a random encryption key when the caller supplies none.
    /// Fails with [`StoreError::ChatKeyTaken`] when the key is already
    /// active.
    pub fn create_secure_chat_session(
        &mut self,
        chat_key: &str,
        encryption_key: Option<&str>,
    ) -> Result<SecureSession> {
        let encryption_key = match encryption_key {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => crypto::generate_key(),
        };
        let session_id = Uuid::new_v4().to_string();

        let tx = self.conn_mut().transaction()?;

        let chat_id = insert_chat(&tx, ChatType::Secure, &[])?;

        let inserted = tx.execute(
            "INSERT INTO secure_chats (chat_id, chat_key, encryption_key, session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                chat_id,
                chat_key,
                encryption_key,
                session_id,
                format_timestamp(Utc::now()),
            ],
        );

        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::ChatKeyTaken),
            Err(e) => return Err(e.into()),
        }

        tx.commit()?;

        Ok(SecureSession {
            chat_id,
            chat_key: chat_key.to_string(),
            encryption_key,
            session_id,
        })
    }

    /// Look up the active session for a chat key.
    pub fn get_secure_chat_session(&self, chat_key: &str) -> Result<Option<SecureSession>> {
        let session = self
            .conn()
            .query_row(
                "SELECT chat_id, encryption_key, session_id FROM secure_chats
                 WHERE chat_key = ?1",
                params![chat_key],
                |row| {
                    Ok(SecureSession {
                        chat_id: row.get(0)?,
                        chat_key: chat_key.to_string(),
                        encryption_key: row.get(1)?,
                        session_id: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Persist a secure message, encrypting it with the session key.
    ///
    /// When encryption fails the message is stored with plaintext only,
    /// matching the delivery behavior for unencryptable content.
    pub fn save_secure_message(&self, chat_key: &str, sender_id: i64, content: &str) -> Result<()> {
        let session = self
            .get_secure_chat_session(chat_key)?
            .ok_or(StoreError::NotFound)?;

        let encrypted = crypto::encrypt_message(content, &session.encryption_key).ok();

        self.save_message(
            session.chat_id,
            sender_id,
            content,
            encrypted.as_deref(),
            MessageType::Secure,
        )?;
        Ok(())
    }

    /// Fetch all messages of a secure chat in chronological order.
    ///
    /// Ciphertext is decrypted server-side with the session key; when
    /// decryption fails, the stored plaintext is returned instead. Unknown
    /// chat keys yield an empty list.
    pub fn get_secure_messages(&self, chat_key: &str) -> Result<Vec<SecureMessage>> {
        let Some(session) = self.get_secure_chat_session(chat_key)? else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn().prepare(
            "SELECT m.content, m.encrypted_content, u.display_name, m.created_at
             FROM messages m
             JOIN users u ON m.sender_id = u.id
             WHERE m.chat_id = ?1 AND m.message_type = 'secure'
             ORDER BY m.created_at ASC, m.id ASC",
        )?;

        let rows = stmt.query_map(params![session.chat_id], |row| {
            let content: Option<String> = row.get(0)?;
            let encrypted: Option<String> = row.get(1)?;
            let sender: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            Ok((content, encrypted, sender, created_at))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (content, encrypted, sender, created_at) = row?;
            let content = match encrypted {
                Some(token) => crypto::decrypt_message(&token, &session.encryption_key)
                    .unwrap_or_else(|_| content.unwrap_or_default()),
                None => content.unwrap_or_default(),
            };
            messages.push(SecureMessage {
                content,
                sender,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(messages)
    }

    /// Close a secure chat: delete its messages and its session row.
    ///
    /// Returns `false` when the chat key is unknown. Irreversible.
    pub fn close_secure_chat(&mut self, chat_key: &str) -> Result<bool> {
        let tx = self.conn_mut().transaction()?;

        let chat_id: Option<i64> = tx
            .query_row(
                "SELECT chat_id FROM secure_chats WHERE chat_key = ?1",
                params![chat_key],
                |row| row.get(0),
            )
            .optional()?;

        let Some(chat_id) = chat_id else {
            return Ok(false);
        };

        tx.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND message_type = 'secure'",
            params![chat_id],
        )?;
        tx.execute(
            "DELETE FROM secure_chats WHERE chat_key = ?1",
            params![chat_key],
        )?;

        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Database, i64) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        db.register_user("alice", "alice", "pw").unwrap();
        let a = db.authenticate_user("alice", "pw").unwrap().user_id;
        (dir, db, a)
    }

    #[test]
    fn create_generates_key_when_absent() {
        let (_dir, mut db, _) = test_db();
        let session = db.create_secure_chat_session("room-1", None).unwrap();
        assert!(!session.encryption_key.is_empty());
        assert!(!session.session_id.is_empty());

        let loaded = db.get_secure_chat_session("room-1").unwrap().unwrap();
        assert_eq!(loaded.encryption_key, session.encryption_key);
    }

    #[test]
    fn duplicate_chat_key_rejected() {
        let (_dir, mut db, _) = test_db();
        db.create_secure_chat_session("room-1", None).unwrap();
        assert!(matches!(
            db.create_secure_chat_session("room-1", None),
            Err(StoreError::ChatKeyTaken)
        ));
    }

    #[test]
    fn secure_messages_roundtrip_chronologically() {
        let (_dir, mut db, alice) = test_db();
        db.create_secure_chat_session("room-1", None).unwrap();

        db.save_secure_message("room-1", alice, "first").unwrap();
        db.save_secure_message("room-1", alice, "second").unwrap();

        let messages = db.get_secure_messages("room-1").unwrap();
        assert_eq!(messages.len(), 2);
        // Oldest first, decrypted back to the original plaintext.
        assert_eq!(messages[0].content, "first");
        assert_eq!(messages[1].content, "second");
        assert_eq!(messages[0].sender, "alice");
    }

    #[test]
    fn close_deletes_messages_and_session() {
        let (_dir, mut db, alice) = test_db();
        let session = db.create_secure_chat_session("room-1", None).unwrap();
        db.save_secure_message("room-1", alice, "doomed").unwrap();

        assert!(db.close_secure_chat("room-1").unwrap());
        assert!(db.get_secure_chat_session("room-1").unwrap().is_none());
        assert!(db.get_secure_messages("room-1").unwrap().is_empty());
        assert!(db
            .get_chat_messages(session.chat_id, 50)
            .unwrap()
            .is_empty());

        // Closing again reports the key as unknown.
        assert!(!db.close_secure_chat("room-1").unwrap());
    }

    #[test]
    fn close_does_not_touch_normal_chats() {
        let (_dir, mut db, alice) = test_db();
        db.register_user("bob", "bob", "pw").unwrap();
        let bob = db.authenticate_user("bob", "pw").unwrap().user_id;
        let chat = db.get_or_create_private_chat(alice, bob).unwrap();
        db.save_message(chat, alice, "keep me", None, MessageType::Normal)
            .unwrap();

        db.create_secure_chat_session("room-1", None).unwrap();
        db.close_secure_chat("room-1").unwrap();

        assert_eq!(db.get_chat_messages(chat, 50).unwrap().len(), 1);
    }

    #[test]
    fn key_can_be_reused_after_close() {
        let (_dir, mut db, _) = test_db();
        db.create_secure_chat_session("room-1", None).unwrap();
        db.close_secure_chat("room-1").unwrap();
        assert!(db.create_secure_chat_session("room-1", None).is_ok());
    }
}
