use thiserror::Error;

/// Errors produced by the store layer.
///
/// Domain failures (`UsernameTaken`, `WrongPassword`, ...) are explicit
/// variants so handlers can surface them verbatim instead of funnelling
/// everything through a generic failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Registration with a username that already exists.
    #[error("Username is already taken")]
    UsernameTaken,

    /// Authentication with a wrong password.
    #[error("Wrong password")]
    WrongPassword,

    /// Display name change to a name held by another user.
    #[error("Display name is already taken")]
    DisplayNameTaken,

    /// Secure chat creation with a chat key that is already active.
    #[error("Secure chat key already exists")]
    ChatKeyTaken,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
