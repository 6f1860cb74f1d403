//! Wire - Length-Prefixed Frame Codec
//!
//! Every frame on a peer connection is a little-endian `u32` byte length
//! followed by a bincode-encoded [`Frame`].
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::io::{ErrorKind, Read, Write};

use serde::{Deserialize, Serialize};

use crate::backend::Tag;
use crate::error::{CommError, CommResult};

/// Largest frame accepted from a peer (256 MiB).
pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// A message on a peer connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// First frame on every connection, sent by the connecting side.
    Hello {
        /// Rank of the sender.
        rank: u32,
        /// World size the sender was started with.
        world_size: u32,
    },
    /// A tagged buffer.
    Data {
        /// Message tag.
        tag: Tag,
        /// Payload.
        payload: Vec<f32>,
    },
}

/// Encodes and writes one frame.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> CommResult<()> {
    let body = bincode::serialize(frame)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(CommError::Protocol(format!(
            "frame of {} bytes exceeds limit of {}",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    let len = u32::try_from(body.len())
        .map_err(|_| CommError::Protocol("frame length overflows u32".to_string()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame. Returns `Ok(None)` on a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> CommResult<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CommError::Protocol(format!(
            "peer announced a {} byte frame (limit {})",
            len, MAX_FRAME_LEN
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(bincode::deserialize(&body)?))
}
