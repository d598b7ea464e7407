//! Error types for the filesystem facade.

use otaru_blob::BlobError;
use otaru_chunk::ChunkError;
use otaru_meta::{MetaError, NodeId};
use thiserror::Error;

/// Result type alias for filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Error variants surfaced by the filesystem facade.
#[derive(Debug, Error)]
pub enum FsError {
    /// Path resolution miss, missing node, or absent blob.
    #[error("Not found: {msg}")]
    NotFound {
        /// What was looked up.
        msg: String,
    },

    /// Descended into a non-directory during path lookup.
    #[error("Not a directory: {msg}")]
    NotDir {
        /// The offending path component or node.
        msg: String,
    },

    /// File operation attempted on a directory.
    #[error("Is a directory: {id}")]
    IsDir {
        /// The directory node ID.
        id: NodeId,
    },

    /// Open flags exceed what the filesystem or store allows.
    #[error("Permission denied: {op}")]
    PermissionDenied {
        /// The rejected operation.
        op: String,
    },

    /// I/O against a closed handle or one with the wrong flags.
    #[error("Bad handle: {msg}")]
    BadHandle {
        /// What made the handle unusable.
        msg: String,
    },

    /// Exclusive create against an existing name.
    #[error("Already exists: {name}")]
    AlreadyExists {
        /// The conflicting name.
        name: String,
    },

    /// Directory removal attempted on a non-empty directory.
    #[error("Directory not empty: {id}")]
    NotEmpty {
        /// The non-empty directory node ID.
        id: NodeId,
    },

    /// Header mismatch, AEAD tag failure, or truncated frame.
    #[error("Corrupt data: {reason}")]
    Corrupt {
        /// What failed to validate.
        reason: String,
    },

    /// Malformed argument (bad path, size out of range).
    #[error("Invalid argument: {msg}")]
    InvalidArgument {
        /// Description of the rejected argument.
        msg: String,
    },

    /// Inode DB precondition violated or logic invariant broken.
    #[error("Internal error: {msg}")]
    Internal {
        /// Description of the failure.
        msg: String,
    },
}

impl From<MetaError> for FsError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::NotFound { id } => FsError::NotFound {
                msg: format!("node {}", id),
            },
            MetaError::NameNotFound { name } => FsError::NotFound { msg: name },
            MetaError::NotDir { id } => FsError::NotDir {
                msg: format!("node {}", id),
            },
            MetaError::NotFile { id } => FsError::IsDir { id },
            MetaError::NotEmpty { id } => FsError::NotEmpty { id },
            MetaError::AlreadyExists { name } => FsError::AlreadyExists { name },
            other => FsError::Internal {
                msg: other.to_string(),
            },
        }
    }
}

impl From<ChunkError> for FsError {
    fn from(e: ChunkError) -> Self {
        match e {
            ChunkError::Corrupt { reason } => FsError::Corrupt { reason },
            ChunkError::Truncated { reason } => FsError::Corrupt { reason },
            ChunkError::PermissionDenied => FsError::PermissionDenied {
                op: "blob store write".to_string(),
            },
            ChunkError::InvalidArgument { msg } => FsError::InvalidArgument { msg },
            ChunkError::Blob(b) => b.into(),
            other => FsError::Internal {
                msg: other.to_string(),
            },
        }
    }
}

impl From<BlobError> for FsError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound { blobpath } => FsError::NotFound {
                msg: format!("blob {}", blobpath),
            },
            BlobError::AlreadyExists { blobpath } => FsError::AlreadyExists { name: blobpath },
            BlobError::PermissionDenied { op } => FsError::PermissionDenied { op: op.to_string() },
            other => FsError::Internal {
                msg: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_not_found_maps_to_not_found() {
        let e: FsError = MetaError::NotFound {
            id: NodeId::new(9),
        }
        .into();
        assert!(matches!(e, FsError::NotFound { .. }));
    }

    #[test]
    fn meta_lock_errors_map_to_internal() {
        let e: FsError = MetaError::LockRequired {
            id: NodeId::new(9),
        }
        .into();
        assert!(matches!(e, FsError::Internal { .. }));
    }

    #[test]
    fn chunk_corruption_maps_to_corrupt() {
        let e: FsError = ChunkError::Corrupt {
            reason: "tag".to_string(),
        }
        .into();
        assert!(matches!(e, FsError::Corrupt { .. }));

        let e: FsError = ChunkError::Truncated {
            reason: "short".to_string(),
        }
        .into();
        assert!(matches!(e, FsError::Corrupt { .. }));
    }

    #[test]
    fn blob_not_found_maps_to_not_found() {
        let e: FsError = BlobError::NotFound {
            blobpath: "xyz".to_string(),
        }
        .into();
        assert!(matches!(e, FsError::NotFound { .. }));
    }
}
