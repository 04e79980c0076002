// Length-prefixed framing over any tokio byte stream.

pub mod framing;

pub use framing::{read_frame, write_frame, FrameError};
