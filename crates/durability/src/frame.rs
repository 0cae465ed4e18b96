//! Record framing shared by every on-disk log
//!
//! # Frame Layout
//!
//! ```text
//! ┌─────────────────┬──────────────────┬─────────────────────────┬──────────┐
//! │ Length (4 bytes)│ Format Ver (1)   │ Payload (variable)      │ CRC32 (4)│
//! └─────────────────┴──────────────────┴─────────────────────────┴──────────┘
//! ```
//!
//! The length field covers format version, payload and CRC. The CRC covers
//! format version and payload.

use crate::error::{DurabilityError, DurabilityResult};
use crc32fast::Hasher;
use std::fs::File;
use std::io::{self, Write};

/// Current frame format version
pub const FRAME_FORMAT_VERSION: u8 = 1;

/// Upper bound on a single frame, used to reject garbage length prefixes
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Frame parsing errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Not enough data to parse a frame (torn tail)
    #[error("Insufficient data to parse frame")]
    InsufficientData,

    /// Length prefix is zero, too small or implausibly large
    #[error("Invalid frame length {0}")]
    InvalidLength(usize),

    /// Checksum verification failed
    #[error("Checksum mismatch: expected {expected:08x}, computed {computed:08x}")]
    ChecksumMismatch {
        /// Checksum stored in the frame
        expected: u32,
        /// Checksum computed over the payload
        computed: u32,
    },

    /// Unsupported format version
    #[error("Unsupported frame format version: {0}")]
    UnsupportedVersion(u8),
}

/// Wrap `payload` in a frame
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(1 + payload.len());
    body.push(FRAME_FORMAT_VERSION);
    body.extend_from_slice(payload);

    let crc = compute_crc(&body);
    let total_len = body.len() + 4;

    let mut frame = Vec::with_capacity(4 + total_len);
    frame.extend_from_slice(&(total_len as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Parse one frame from the front of `bytes`
///
/// Returns the payload and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), FrameError> {
    if bytes.len() < 4 {
        return Err(FrameError::InsufficientData);
    }
    let length = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;

    // Minimum: 1 byte format version + 4 bytes CRC
    if length < 5 || length > MAX_FRAME_LEN {
        return Err(FrameError::InvalidLength(length));
    }
    if bytes.len() < 4 + length {
        return Err(FrameError::InsufficientData);
    }

    let body = &bytes[4..4 + length - 4];
    let crc_bytes = &bytes[4 + length - 4..4 + length];
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let computed = compute_crc(body);
    if stored != computed {
        return Err(FrameError::ChecksumMismatch {
            expected: stored,
            computed,
        });
    }

    if body[0] != FRAME_FORMAT_VERSION {
        return Err(FrameError::UnsupportedVersion(body[0]));
    }

    Ok((&body[1..], 4 + length))
}

/// Append sink that can be cut back to an earlier length
pub trait Truncate: Write {
    /// Current end of the sink in bytes
    fn end_offset(&mut self) -> io::Result<u64>;

    /// Drop every byte at or after `offset`
    fn truncate_to(&mut self, offset: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn end_offset(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, offset: u64) -> io::Result<()> {
        self.set_len(offset)
    }
}

/// Write a whole frame or nothing
///
/// A failed write is cut back to where the frame began, so the next append
/// still starts on a frame boundary. If even that fails the error is
/// `TornWrite` and the sink must not be appended to again.
pub fn append_frame<W: Truncate>(sink: &mut W, frame: &[u8]) -> DurabilityResult<()> {
    let offset = sink.end_offset()?;
    match sink.write_all(frame) {
        Ok(()) => Ok(()),
        Err(write_err) => match sink.truncate_to(offset) {
            Ok(()) => Err(DurabilityError::Io(write_err)),
            Err(source) => Err(DurabilityError::TornWrite { offset, source }),
        },
    }
}

fn compute_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
