//! Error types for the inode DB.

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias for inode DB operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Error variants for inode DB operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetaError {
    /// The referenced node does not exist.
    #[error("Node not found: {id}")]
    NotFound {
        /// The missing node ID.
        id: NodeId,
    },

    /// A directory entry lookup missed.
    #[error("Name not found: {name}")]
    NameNotFound {
        /// The missing entry name.
        name: String,
    },

    /// Operation requires a directory.
    #[error("Not a directory: {id}")]
    NotDir {
        /// The offending node ID.
        id: NodeId,
    },

    /// Operation requires a file.
    #[error("Not a file: {id}")]
    NotFile {
        /// The offending node ID.
        id: NodeId,
    },

    /// Directory removal attempted on a non-empty directory.
    #[error("Directory not empty: {id}")]
    NotEmpty {
        /// The non-empty directory ID.
        id: NodeId,
    },

    /// Name already taken in the target directory.
    #[error("Name already exists: {name}")]
    AlreadyExists {
        /// The conflicting name.
        name: String,
    },

    /// A node with this ID already exists.
    #[error("Node already exists: {id}")]
    NodeAlreadyExists {
        /// The conflicting node ID.
        id: NodeId,
    },

    /// The op requires an exclusive ticket but presented none.
    #[error("Write lock required for node {id}")]
    LockRequired {
        /// The node the op targeted.
        id: NodeId,
    },

    /// The presented ticket does not match the held lock.
    #[error("Lock ticket mismatch for node {id}")]
    LockMismatch {
        /// The node the op targeted.
        id: NodeId,
    },

    /// The node is exclusively locked by another holder.
    #[error("Node {id} is locked")]
    LockContended {
        /// The contended node ID.
        id: NodeId,
    },

    /// Snapshot restore found nothing to restore.
    #[error("No snapshot available to restore")]
    NoSnapshot,

    /// Attempt to initialize a DB that already holds state.
    #[error("DB is not empty; refusing to initialize")]
    NotEmptyDb,

    /// The tx log or snapshot store rejected a write.
    #[error("Metadata store is read-only")]
    ReadOnlyStore,

    /// Snapshot or tx log (de)serialization failed.
    #[error("Serialization error: {reason}")]
    SerializationError {
        /// Description of the failure.
        reason: String,
    },

    /// Internal invariant broken.
    #[error("Internal error: {msg}")]
    Internal {
        /// Description of the broken invariant.
        msg: String,
    },

    /// Test-only forced failure.
    #[error("Forced failure for testing")]
    Forced,
}
