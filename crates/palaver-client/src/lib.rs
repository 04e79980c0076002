//! # palaver-client
//!
//! Client session driver: one persistent connection to a Palaver server, a
//! background task that surfaces every inbound frame as an event, and typed
//! request senders for the whole wire protocol. Reconnection is the
//! caller's responsibility.

pub mod session;

mod error;

pub use error::ClientError;
pub use session::{ClientEvent, ClientSession};
