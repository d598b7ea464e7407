//! Error types for the blob subsystem.

use thiserror::Error;

/// Result type alias for blob store operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Error variants for blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested blob does not exist.
    #[error("Blob not found: {blobpath}")]
    NotFound {
        /// The blobpath that was not found.
        blobpath: String,
    },

    /// Exclusive create against an existing blob.
    #[error("Blob already exists: {blobpath}")]
    AlreadyExists {
        /// The blobpath that already exists.
        blobpath: String,
    },

    /// The operation exceeds the store's or handle's open flags.
    #[error("Permission denied: {op} not allowed by open flags")]
    PermissionDenied {
        /// The operation that was rejected.
        op: &'static str,
    },

    /// The blobpath contains characters the backend cannot store safely.
    #[error("Invalid blobpath: {blobpath}")]
    InvalidBlobPath {
        /// The offending blobpath.
        blobpath: String,
    },

    /// Could not generate a fresh unique blobpath within the retry bound.
    #[error("Failed to generate unique blobpath within {attempts} attempts")]
    PathGenExhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = BlobError::NotFound {
            blobpath: "abc123".to_string(),
        };
        assert!(format!("{}", err).contains("abc123"));
    }

    #[test]
    fn test_permission_denied_display() {
        let err = BlobError::PermissionDenied { op: "pwrite" };
        assert!(format!("{}", err).contains("pwrite"));
    }
}
