//! # palaver-server
//!
//! Messenger server core: accepts TCP connections, runs one tokio task per
//! connection, dispatches typed JSON requests, and fans new messages out to
//! the relevant connected clients.

pub mod config;
pub mod handler;
pub mod registry;
pub mod server;

pub use config::ServerConfig;
pub use registry::{ConnId, SessionRegistry};
pub use server::Server;
