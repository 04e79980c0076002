//! User registration, authentication, lookup, and profile changes.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use palaver_shared::crypto;
use palaver_shared::phrase::generate_secret_phrase;
use palaver_shared::types::UserData;

use crate::database::{format_timestamp, Database};
use crate::error::{Result, StoreError};

impl Database {
    /// Register a new user. Returns the generated secret recovery phrase.
    ///
    /// The username UNIQUE constraint backs the pre-check, so a race
    /// between two registrations still yields exactly one success.
    pub fn register_user(
        &self,
        username: &str,
        display_name: &str,
        password: &str,
    ) -> Result<String> {
        let existing: Option<i64> = self
            .conn()
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(StoreError::UsernameTaken);
        }

        let secret_phrase = generate_secret_phrase();
        let password_hash = crypto::hash_password(password);

        let inserted = self.conn().execute(
            "INSERT INTO users (username, display_name, password_hash, secret_phrase, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                username,
                display_name,
                password_hash,
                secret_phrase,
                format_timestamp(Utc::now()),
            ],
        );

        match inserted {
            Ok(_) => Ok(secret_phrase),
            Err(e) if is_unique_violation(&e) => Err(StoreError::UsernameTaken),
            Err(e) => Err(e.into()),
        }
    }

    /// Authenticate a user by username and password.
    pub fn authenticate_user(&self, username: &str, password: &str) -> Result<UserData> {
        let row: Option<(i64, String, String)> = self
            .conn()
            .query_row(
                "SELECT id, password_hash, display_name FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (user_id, password_hash, display_name) = row.ok_or(StoreError::NotFound)?;

        if !crypto::verify_password(password, &password_hash) {
            return Err(StoreError::WrongPassword);
        }

        Ok(UserData {
            user_id,
            username: username.to_string(),
            display_name,
        })
    }

    /// Look up a user by display name.
    pub fn find_user_by_display_name(&self, display_name: &str) -> Result<Option<UserData>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, display_name FROM users WHERE display_name = ?1",
                params![display_name],
                |row| {
                    Ok(UserData {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_display_name(&self, user_id: i64) -> Result<Option<String>> {
        let name = self
            .conn()
            .query_row(
                "SELECT display_name FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }

    /// Change a user's display name. Fails when another user already holds
    /// the new name.
    pub fn change_display_name(&self, user_id: i64, new_display_name: &str) -> Result<()> {
        let taken: Option<i64> = self
            .conn()
            .query_row(
                "SELECT id FROM users WHERE display_name = ?1 AND id != ?2",
                params![new_display_name, user_id],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::DisplayNameTaken);
        }

        let affected = self.conn().execute(
            "UPDATE users SET display_name = ?1 WHERE id = ?2",
            params![new_display_name, user_id],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// True when the error is a SQLite UNIQUE / constraint violation.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
