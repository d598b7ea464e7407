//! Error types for the crypt subsystem.

use thiserror::Error;

/// Result type alias for crypt operations.
pub type CryptResult<T> = Result<T, CryptError>;

/// Error variants for cipher and frame-stream operations.
#[derive(Debug, Error)]
pub enum CryptError {
    /// Wraps standard I/O errors from the underlying source/sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The supplied key material has the wrong length.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength {
        /// Required key length in bytes.
        expected: usize,
        /// Length of the key that was supplied.
        actual: usize,
    },

    /// A frame payload exceeded the fixed ceiling.
    #[error("Frame payload too large: {len} > {max}")]
    FrameTooLarge {
        /// Payload length that was attempted.
        len: usize,
        /// Maximum allowed payload length.
        max: usize,
    },

    /// AEAD seal failed (should not happen with a valid cipher).
    #[error("Frame seal failed")]
    SealFailed,

    /// Authentication tag mismatch — the frame is corrupted or tampered.
    #[error("Frame authentication failed: tag mismatch")]
    AuthFailed,

    /// The source ended before a complete frame could be read.
    #[error("Truncated frame: expected {expected} bytes, got {actual}")]
    TruncatedFrame {
        /// Encrypted frame length that was expected.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Stream closed with a different number of plaintext bytes than declared.
    #[error("Declared length mismatch: declared {declared} bytes, wrote {written}")]
    LengthMismatch {
        /// Total plaintext length declared at stream construction.
        declared: u64,
        /// Plaintext bytes actually written.
        written: u64,
    },
}
