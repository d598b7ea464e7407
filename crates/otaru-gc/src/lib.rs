#![warn(missing_docs)]

//! Otaru garbage collection subsystem.
//!
//! Two reconciliation jobs: the blob-store sweep removes blobs no inode
//! references (the mark set comes from the inode DB fsck walk), and the
//! tx-log GC discards log entries whose effects are captured by a durable
//! snapshot. Both are idempotent and honor a cancellation token; only
//! blob deletion is irreversible.

pub mod blobstore;
pub mod cancel;
pub mod error;
pub mod txlog;

pub use blobstore::{gc_blobstore, BlobGcStats, Fscker, GcableBlobStore};
pub use cancel::CancelToken;
pub use error::{GcError, GcResult};
pub use txlog::{gc_txlog, TxLogDeleter, UnneededTxThresholdFinder};
