use thiserror::Error;

/// Errors produced by the client session driver.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Frame(#[from] palaver_net::FrameError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
