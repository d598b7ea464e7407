//! Error types for the chunk subsystem.

use otaru_blob::BlobError;
use otaru_crypt::CryptError;
use thiserror::Error;

/// Result type alias for chunk operations.
pub type ChunkResult<T> = Result<T, ChunkError>;

/// Error variants for chunk encoding, decoding and chunked file I/O.
#[derive(Debug, Error)]
pub enum ChunkError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error from the underlying blob store.
    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    /// The chunk is corrupt: bad magic/version, or an AEAD tag failed.
    /// Non-retryable.
    #[error("Corrupt chunk: {reason}")]
    Corrupt {
        /// What failed to validate.
        reason: String,
    },

    /// The blob ended before a complete header or frame. Non-retryable.
    #[error("Truncated chunk: {reason}")]
    Truncated {
        /// What was being read when the blob ran out.
        reason: String,
    },

    /// Write attempted against a store without write access.
    #[error("Permission denied: blob store is not writable")]
    PermissionDenied,

    /// A size or offset argument is out of range.
    #[error("Invalid argument: {msg}")]
    InvalidArgument {
        /// Description of the rejected argument.
        msg: String,
    },

    /// Internal invariant violated.
    #[error("Internal error: {msg}")]
    Internal {
        /// Description of the broken invariant.
        msg: String,
    },
}

impl From<CryptError> for ChunkError {
    fn from(e: CryptError) -> Self {
        match e {
            CryptError::Io(io) => ChunkError::Io(io),
            CryptError::AuthFailed => ChunkError::Corrupt {
                reason: "frame authentication failed".to_string(),
            },
            CryptError::TruncatedFrame { expected, actual } => ChunkError::Truncated {
                reason: format!("frame needs {} bytes, got {}", expected, actual),
            },
            other => ChunkError::Corrupt {
                reason: other.to_string(),
            },
        }
    }
}
