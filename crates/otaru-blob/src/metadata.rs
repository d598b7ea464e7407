//! Reserved metadata blobpath namespace.
//!
//! Blobpaths starting with `META_` carry filesystem metadata (inode DB
//! snapshot, version cache). The garbage collector never reclaims them by
//! path, even when no inode references them.

/// Prefix reserved for metadata blobs.
pub const METADATA_PREFIX: &str = "META_";

/// Blobpath of the inode DB snapshot.
pub const INODEDB_SNAPSHOT_BLOBPATH: &str = "META_INODEDB_SNAPSHOT";

/// Blobpath of the blob version cache maintained by caching layers.
pub const VERSION_CACHE_BLOBPATH: &str = "META_VERSION_CACHE";

/// True if `blobpath` falls in the reserved metadata namespace.
pub fn is_metadata_blobpath(blobpath: &str) -> bool {
    blobpath.starts_with(METADATA_PREFIX)
}
