//! v001 -- Initial schema creation.
//!
//! Creates the five core tables: `users`, `chats`, `chat_participants`,
//! `messages`, and `secure_chats`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT UNIQUE NOT NULL,
    display_name  TEXT NOT NULL,
    password_hash TEXT NOT NULL,               -- hex(salt) || hex(digest)
    secret_phrase TEXT NOT NULL,
    created_at    TEXT NOT NULL                -- RFC 3339
);

-- ----------------------------------------------------------------
-- Chats ('private' or 'secure')
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chats (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_type  TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Chat membership (many-to-many)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS chat_participants (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id),
    FOREIGN KEY (user_id) REFERENCES users(id),
    UNIQUE (chat_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON chat_participants(user_id);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id           INTEGER NOT NULL,
    sender_id         INTEGER NOT NULL,
    content           TEXT,
    encrypted_content TEXT,                    -- base64 token, nullable
    message_type      TEXT NOT NULL DEFAULT 'normal',
    created_at        TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id),
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_chat_ts
    ON messages(chat_id, created_at DESC);

-- ----------------------------------------------------------------
-- Secure chat sessions (chat-key indexed, ephemeral)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS secure_chats (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id        INTEGER NOT NULL,
    chat_key       TEXT UNIQUE NOT NULL,
    encryption_key TEXT NOT NULL,              -- base64 symmetric key
    session_id     TEXT NOT NULL,              -- UUID v4
    created_at     TEXT NOT NULL,

    FOREIGN KEY (chat_id) REFERENCES chats(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
