//! # palaver-store
//!
//! Relational persistence for the Palaver messenger, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for users, chats,
//! messages, and secure-chat sessions. Each helper is a self-contained
//! transaction; there is no cross-request transaction spanning.

pub mod chats;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod secure;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
