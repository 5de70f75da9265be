//! Checksums and record framing
//!
//! Every persisted record carries a CRC32 so torn or bit-rotted writes are
//! detected on read instead of being decoded into garbage.
//!
//! Frame layout used by the manifest and commit logs:
//!
//! ```text
//! [data_len: u32 LE][data: data_len bytes][crc32(data): u32 LE]
//! ```

use crate::ConfDbError;
use crc32fast::Hasher;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = 8;

pub struct Checksum;

impl Checksum {
    pub fn compute(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn verify(data: &[u8], expected: u32) -> Result<(), ChecksumError> {
        let actual = Self::compute(data);
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                expected,
                actual,
                data_len: data.len(),
            });
        }
        Ok(())
    }

    /// Wraps `data` in a frame.
    pub fn encode_frame(data: &[u8]) -> Vec<u8> {
        let checksum = Self::compute(data);
        let mut encoded = Vec::with_capacity(FRAME_OVERHEAD + data.len());
        encoded.extend_from_slice(&(data.len() as u32).to_le_bytes());
        encoded.extend_from_slice(data);
        encoded.extend_from_slice(&checksum.to_le_bytes());
        encoded
    }

    /// Decodes the frame at the start of `buf`.
    ///
    /// Returns the payload and the total frame length. A frame that runs past
    /// the end of `buf` is reported as `Truncated`.
    pub fn decode_frame(buf: &[u8]) -> Result<(&[u8], usize), ChecksumError> {
        if buf.len() < 4 {
            return Err(ChecksumError::Truncated { available: buf.len() });
        }
        let data_len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let total = FRAME_OVERHEAD + data_len;
        if buf.len() < total {
            return Err(ChecksumError::Truncated { available: buf.len() });
        }

        let data = &buf[4..4 + data_len];
        let crc_at = 4 + data_len;
        let expected = u32::from_le_bytes([
            buf[crc_at],
            buf[crc_at + 1],
            buf[crc_at + 2],
            buf[crc_at + 3],
        ]);
        Self::verify(data, expected)?;
        Ok((data, total))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x} (data_len={data_len})")]
    Mismatch {
        expected: u32,
        actual: u32,
        data_len: usize,
    },

    #[error("truncated frame ({available} bytes available)")]
    Truncated { available: usize },
}

impl From<ChecksumError> for ConfDbError {
    fn from(err: ChecksumError) -> Self {
        ConfDbError::Corruption(err.to_string())
    }
}
