#![warn(missing_docs)]

//! Otaru filesystem subsystem: the POSIX-style facade over the inode DB
//! and the chunk layer.
//!
//! Path resolution, create/rename/remove, attribute projection, the
//! per-inode open-file table with its lock upgrade/downgrade protocol,
//! the patch-coalescing write cache, and the blobstore-backed snapshot
//! and tx-log stores all live here.

pub mod chunks_array;
pub mod error;
pub mod filesystem;
pub mod openfile;
pub mod persist;
pub mod writecache;

pub use chunks_array::InodeDbChunksArrayIo;
pub use error::{FsError, FsResult};
pub use filesystem::{Attr, AttrFields, FileSystem, FileSystemStats};
pub use openfile::{FileHandle, OpenFile};
pub use persist::{BlobSnapshotIo, BlobTxLogIo};
pub use writecache::{FileWriteCache, Patch, Patches, WriteCacheConfig};
