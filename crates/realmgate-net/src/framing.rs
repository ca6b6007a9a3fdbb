//! Length-prefixed framing for TCP streams.
//!
//! Every packet on the wire is a frame:
//!
//! ```text
//! +------------------+-----------------+------------------+
//! | length (2 bytes) | opcode (2 bytes)| payload          |
//! | u16 little-endian| u16 LE          | (length - 2)     |
//! +------------------+-----------------+------------------+
//! ```
//!
//! `length` counts the *body* (opcode + payload) and is never encrypted.
//! Once a session cipher is installed the body is transformed in place; the
//! framing layer never looks inside it.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::packet::Opcode;

/// Size of the length prefix.
pub const LENGTH_PREFIX_LEN: usize = 2;

/// Size of the opcode at the start of every body.
pub const OPCODE_LEN: usize = 2;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed body size in bytes. Default: 65 535 (the prefix limit).
    pub max_body_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: usize::from(u16::MAX),
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The body size exceeds the configured maximum.
    #[error("body size {size} exceeds maximum {max}")]
    BodyTooLarge {
        /// The actual body size.
        size: usize,
        /// The configured maximum.
        max: usize,
    },

    /// The connection was closed before a complete frame was received.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build a frame body from an opcode and payload.
pub fn encode_body(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(OPCODE_LEN + payload.len());
    body.extend_from_slice(&opcode.0.to_le_bytes());
    body.extend_from_slice(payload);
    body
}

/// Split a (decrypted) body into its opcode and payload. Returns `None` when
/// the body is too short to carry an opcode.
pub fn split_body(mut body: Vec<u8>) -> Option<(Opcode, Vec<u8>)> {
    if body.len() < OPCODE_LEN {
        return None;
    }
    let payload = body.split_off(OPCODE_LEN);
    let opcode = Opcode(u16::from_le_bytes([body[0], body[1]]));
    Some((opcode, payload))
}

/// Prefix a body with its length, producing the bytes to put on the wire.
pub fn encode_frame(body: &[u8], config: &FrameConfig) -> Result<Vec<u8>, FrameError> {
    let len = checked_len(body.len(), config)?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_LEN + body.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

fn checked_len(size: usize, config: &FrameConfig) -> Result<u16, FrameError> {
    let max = config.max_body_size.min(usize::from(u16::MAX));
    if size > max {
        return Err(FrameError::BodyTooLarge { size, max });
    }
    u16::try_from(size).map_err(|_| FrameError::BodyTooLarge { size, max })
}

/// Read a single frame body from the stream.
///
/// Returns [`FrameError::ConnectionClosed`] if the peer closes the connection
/// before the frame is complete.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; LENGTH_PREFIX_LEN];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    let body_len = usize::from(u16::from_le_bytes(len_buf));
    if body_len > config.max_body_size {
        return Err(FrameError::BodyTooLarge {
            size: body_len,
            max: config.max_body_size,
        });
    }

    let mut body = vec![0u8; body_len];
    if body_len > 0 {
        reader.read_exact(&mut body).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                FrameError::ConnectionClosed
            } else {
                FrameError::Io(e)
            }
        })?;
    }

    Ok(body)
}

/// Write a single frame body to the stream.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    body: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let frame = encode_frame(body, config)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
