//! Error types for the garbage collector.

use otaru_blob::BlobError;
use otaru_meta::MetaError;
use thiserror::Error;

/// Result type alias for GC operations.
pub type GcResult<T> = Result<T, GcError>;

/// Error variants for GC runs.
#[derive(Debug, Error)]
pub enum GcError {
    /// The run was aborted via its cancellation token.
    #[error("GC canceled")]
    Canceled,

    /// Another instance of this GC job is already running.
    #[error("Another GC run is already in progress")]
    AlreadyRunning,

    /// The inode DB fsck walk reported inconsistencies; sweeping with an
    /// incomplete mark set would delete live data.
    #[error("fsck reported {count} errors; aborting sweep")]
    FsckFailed {
        /// Number of errors reported.
        count: usize,
    },

    /// Error from the blob store.
    #[error("Blob store error: {0}")]
    Blob(#[from] BlobError),

    /// Error from the inode DB.
    #[error("Inode DB error: {0}")]
    Meta(#[from] MetaError),
}
