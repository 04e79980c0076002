//! # palaver-shared
//!
//! Types and primitives shared by the Palaver server and client: the JSON
//! wire protocol, the credential engine (password hashing and message
//! encryption), secret recovery phrases, and common constants.

pub mod constants;
pub mod crypto;
pub mod phrase;
pub mod protocol;
pub mod types;

mod error;

pub use error::CryptoError;
