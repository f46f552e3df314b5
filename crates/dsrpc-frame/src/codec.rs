use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FrameError, Result};

/// Frame header: a 2-byte big-endian body length.
pub const HEADER_SIZE: usize = 2;

/// Largest body the length prefix can describe.
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

/// Encode a body into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────────┬──────────────────────┐
/// │ Length (2B BE)   │ Body (Length bytes)  │
/// └──────────────────┴──────────────────────┘
/// ```
///
/// Bodies longer than `max_body_size` (itself capped at [`MAX_BODY_SIZE`])
/// are rejected and nothing is written to `dst`.
pub fn encode_frame(body: &[u8], max_body_size: usize, dst: &mut BytesMut) -> Result<()> {
    let max = max_body_size.min(MAX_BODY_SIZE);
    if body.len() > max {
        return Err(FrameError::BodyTooLarge {
            size: body.len(),
            max,
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u16(body.len() as u16);
    dst.put_slice(body);
    Ok(())
}

/// Serialize `message` and frame it into `dst`. Returns the body length.
pub fn encode_message<T: Serialize>(
    message: &T,
    max_body_size: usize,
    dst: &mut BytesMut,
) -> Result<usize> {
    let body = encode_body(message)?;
    encode_frame(&body, max_body_size, dst)?;
    Ok(body.len())
}

/// Serialize a body without framing it.
pub fn encode_body<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    bincode::serialize(message).map_err(FrameError::Encode)
}

/// Interpret a frame header as a body length.
pub fn decode_header(header: [u8; HEADER_SIZE]) -> usize {
    u16::from_be_bytes(header) as usize
}

/// Parse a body. An empty body decodes to `T::default()`.
pub fn decode_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T> {
    if body.is_empty() {
        return Ok(T::default());
    }
    bincode::deserialize(body).map_err(FrameError::Decode)
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer and returns the body.
pub fn decode_frame(src: &mut BytesMut, max_body_size: usize) -> Result<Option<Bytes>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let body_len = decode_header([src[0], src[1]]);
    if body_len > max_body_size {
        return Err(FrameError::BodyTooLarge {
            size: body_len,
            max: max_body_size,
        });
    }

    if src.len() < HEADER_SIZE + body_len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    Ok(Some(src.split_to(body_len).freeze()))
}

/// Configuration for framing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum body size in bytes. Default (and ceiling): 65535.
    pub max_body_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_body_size: MAX_BODY_SIZE,
            read_timeout: None,
            write_timeout: None,
        }
    }
}
