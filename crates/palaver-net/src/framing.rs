//! Length-prefixed frame codec.
//!
//! Every frame is a 4-byte big-endian payload length followed by that many
//! bytes of UTF-8 text. A clean end-of-stream between frames is a normal
//! disconnect; a stream that ends mid-header or mid-payload is a protocol
//! violation and terminates the connection.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use palaver_shared::constants::{MAX_FRAME_SIZE, READ_CHUNK_SIZE};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stream ended inside a frame")]
    UnexpectedEof,

    #[error("Declared frame length {0} exceeds maximum {MAX_FRAME_SIZE}")]
    Oversize(usize),

    #[error("Frame payload is not valid UTF-8")]
    Utf8,
}

/// Write one frame: big-endian length prefix, then the payload bytes.
pub async fn write_frame<W>(writer: &mut W, payload: &str) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = payload.as_bytes();
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(FrameError::Oversize(bytes.len()));
    }

    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before the
/// first header byte. Any other short read is an [`FrameError::UnexpectedEof`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<String>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(FrameError::UnexpectedEof);
        }
        filled += n;
    }

    let length = u32::from_be_bytes(header) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::Oversize(length));
    }

    // Read the payload in bounded chunks until the declared length arrives.
    let mut payload = vec![0u8; length];
    let mut received = 0;
    while received < length {
        let end = usize::min(received + READ_CHUNK_SIZE, length);
        let n = reader.read(&mut payload[received..end]).await?;
        if n == 0 {
            return Err(FrameError::UnexpectedEof);
        }
        received += n;
    }

    match String::from_utf8(payload) {
        Ok(text) => Ok(Some(text)),
        Err(_) => Err(FrameError::Utf8),
    }
}
