//! The fixed-size unencrypted chunk header.
//!
//! On-disk layout (all integers little-endian):
//!
//! ```text
//! offset 0  : magic[8]            = "OTARUCHK"
//! offset 8  : format_version u16
//! offset 10 : flags          u16
//! offset 12 : frame_max_payload u32   (must equal 262144)
//! offset 16 : payload_len    i64      (plaintext, finalized at close)
//! offset 24 : origin_offset  i64
//! offset 32 : origpath_len   u16
//! offset 34 : reserved, zero-padded to 64
//! ```

use otaru_crypt::{FRAME_OVERHEAD, MAX_FRAME_PAYLOAD};

use crate::error::{ChunkError, ChunkResult};

/// Magic bytes identifying a chunk blob.
pub const CHUNK_MAGIC: [u8; 8] = *b"OTARUCHK";

/// Current chunk format version.
pub const CHUNK_FORMAT_VERSION: u16 = 1;

/// Marshaled header length in bytes.
pub const CHUNK_HEADER_LEN: usize = 64;

/// Parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Format version; only [`CHUNK_FORMAT_VERSION`] is accepted.
    pub format_version: u16,
    /// Reserved flag bits (zero).
    pub flags: u16,
    /// Frame payload ceiling the chunk was written with.
    pub frame_max_payload: u32,
    /// Total plaintext payload length.
    pub payload_len: u64,
    /// Logical byte position in the file this chunk begins at.
    pub origin_offset: u64,
    /// Plaintext length of the prologue frame (origin filename bytes).
    pub origpath_len: u16,
}

impl ChunkHeader {
    /// Builds a header for a fresh chunk with a zero payload placeholder.
    pub fn new(origin_offset: u64, origpath_len: u16) -> Self {
        Self {
            format_version: CHUNK_FORMAT_VERSION,
            flags: 0,
            frame_max_payload: MAX_FRAME_PAYLOAD as u32,
            payload_len: 0,
            origin_offset,
            origpath_len,
        }
    }

    /// Marshals the header into its 64-byte on-disk form.
    pub fn encode(&self) -> [u8; CHUNK_HEADER_LEN] {
        let mut b = [0u8; CHUNK_HEADER_LEN];
        b[0..8].copy_from_slice(&CHUNK_MAGIC);
        b[8..10].copy_from_slice(&self.format_version.to_le_bytes());
        b[10..12].copy_from_slice(&self.flags.to_le_bytes());
        b[12..16].copy_from_slice(&self.frame_max_payload.to_le_bytes());
        b[16..24].copy_from_slice(&(self.payload_len as i64).to_le_bytes());
        b[24..32].copy_from_slice(&(self.origin_offset as i64).to_le_bytes());
        b[32..34].copy_from_slice(&self.origpath_len.to_le_bytes());
        b
    }

    /// Unmarshals and validates a header from its on-disk form.
    pub fn decode(b: &[u8]) -> ChunkResult<Self> {
        if b.len() < CHUNK_HEADER_LEN {
            return Err(ChunkError::Truncated {
                reason: format!("header needs {} bytes, got {}", CHUNK_HEADER_LEN, b.len()),
            });
        }
        if b[0..8] != CHUNK_MAGIC {
            return Err(ChunkError::Corrupt {
                reason: "header magic mismatch".to_string(),
            });
        }

        let format_version = u16::from_le_bytes([b[8], b[9]]);
        if format_version != CHUNK_FORMAT_VERSION {
            return Err(ChunkError::Corrupt {
                reason: format!("unsupported chunk format version {}", format_version),
            });
        }

        let flags = u16::from_le_bytes([b[10], b[11]]);
        let frame_max_payload = u32::from_le_bytes([b[12], b[13], b[14], b[15]]);
        if frame_max_payload != MAX_FRAME_PAYLOAD as u32 {
            return Err(ChunkError::Corrupt {
                reason: format!("unexpected frame max payload {}", frame_max_payload),
            });
        }

        let payload_len = i64::from_le_bytes(b[16..24].try_into().unwrap());
        let origin_offset = i64::from_le_bytes(b[24..32].try_into().unwrap());
        if payload_len < 0 || origin_offset < 0 {
            return Err(ChunkError::Corrupt {
                reason: "negative length field in header".to_string(),
            });
        }

        let origpath_len = u16::from_le_bytes([b[32], b[33]]);

        Ok(Self {
            format_version,
            flags,
            frame_max_payload,
            payload_len: payload_len as u64,
            origin_offset: origin_offset as u64,
            origpath_len,
        })
    }

    /// Encrypted size of the prologue frame.
    pub fn prologue_frame_len(&self) -> u64 {
        self.origpath_len as u64 + FRAME_OVERHEAD as u64
    }

    /// Blob offset where the content frame stream begins.
    pub fn frame_stream_offset(&self) -> u64 {
        CHUNK_HEADER_LEN as u64 + self.prologue_frame_len()
    }

    /// Number of content frames: `ceil(payload_len / frame_max_payload)`.
    pub fn frame_count(&self) -> u64 {
        self.payload_len.div_ceil(MAX_FRAME_PAYLOAD as u64)
    }
}
