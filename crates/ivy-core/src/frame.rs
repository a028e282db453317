//! Length-prefixed framing over a byte stream.
//!
//! ```text
//! +---------------------------+---------------------------+
//! | length (u64, little-end.) | payload (length bytes)    |
//! +---------------------------+---------------------------+
//! ```
//!
//! The declared length is bounded by `max_frame_size` on both ends, so a
//! hostile peer cannot make the reader allocate an arbitrary buffer.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, FramingError, Result};

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 8;

/// Default maximum frame payload (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Write one frame: the length prefix followed by the payload.
///
/// Prefix and payload are submitted in a single write so the frame is one
/// unit on the stream.
///
/// # Errors
///
/// Returns [`FramingError::FrameTooLarge`] if `payload` exceeds
/// `max_frame_size`, or [`Error::Io`] on write failure.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > max_frame_size {
        return Err(FramingError::FrameTooLarge {
            len: payload.len() as u64,
            max: max_frame_size,
        }
        .into());
    }

    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    buf.extend_from_slice(payload);

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and return its payload.
///
/// # Errors
///
/// - [`Error::Closed`] if the stream ends cleanly before any prefix byte
/// - [`FramingError::Truncated`] if the stream ends inside a frame
/// - [`FramingError::FrameTooLarge`] if the declared length exceeds
///   `max_frame_size` (checked before allocating)
/// - [`Error::Io`] on any other read failure
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    let mut filled = 0;
    while filled < LENGTH_PREFIX_SIZE {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(Error::Closed);
            }
            return Err(FramingError::Truncated {
                expected: (LENGTH_PREFIX_SIZE - filled) as u64,
            }
            .into());
        }
        filled += n;
    }

    let len = u64::from_le_bytes(prefix);
    let len = usize::try_from(len)
        .ok()
        .filter(|&len| len <= max_frame_size)
        .ok_or(FramingError::FrameTooLarge {
            len,
            max: max_frame_size,
        })?;

    let mut payload = vec![0u8; len];
    match reader.read_exact(&mut payload).await {
        Ok(_) => Ok(payload),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FramingError::Truncated {
            expected: len as u64,
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}
