//! Mark-and-sweep over the blob store.

use std::collections::HashSet;

use otaru_blob::{is_metadata_blobpath, BlobLister, BlobRemover};
use otaru_meta::{DbHandler, MetaError, MetaResult};
use serde::Serialize;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{GcError, GcResult};

/// A blob store the collector can sweep: listing plus removal.
pub trait GcableBlobStore: BlobLister + BlobRemover {}

impl<T: BlobLister + BlobRemover> GcableBlobStore for T {}

/// Source of the mark set: the reachability walk over the inode DB.
pub trait Fscker {
    /// Returns every live blobpath plus any inconsistencies found.
    fn fsck(&self) -> MetaResult<(Vec<String>, Vec<MetaError>)>;
}

impl<T: DbHandler + ?Sized> Fscker for T {
    fn fsck(&self) -> MetaResult<(Vec<String>, Vec<MetaError>)> {
        DbHandler::fsck(self)
    }
}

/// Counters from one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BlobGcStats {
    /// Blobs listed in the store.
    pub listed: usize,
    /// Live blobpaths reported by fsck.
    pub live: usize,
    /// Reserved metadata blobs skipped by path.
    pub reserved: usize,
    /// Unreferenced blobs found.
    pub unused: usize,
    /// Blobs actually removed (zero on dry runs).
    pub removed: usize,
}

/// Sweeps the blob store: removes every blob that is neither reachable
/// from the inode DB nor in the reserved `META_` namespace.
///
/// Cancellation is checked before listing, after fsck, and between
/// removals; a removal error aborts the sweep. With `dry_run`, unused
/// blobs are logged and left in place. Safe to re-run at any time.
pub fn gc_blobstore(
    token: &CancelToken,
    bs: &dyn GcableBlobStore,
    fscker: &dyn Fscker,
    dry_run: bool,
) -> GcResult<BlobGcStats> {
    let mut stats = BlobGcStats::default();
    info!(dry_run, "blobstore GC start, listing blobs");

    token.check()?;
    let all = bs.list_blobs()?;
    stats.listed = all.len();
    info!(blobs = all.len(), "blob listing done, starting fsck");

    token.check()?;
    let (live, errors) = fscker.fsck()?;
    if !errors.is_empty() {
        return Err(GcError::FsckFailed {
            count: errors.len(),
        });
    }
    stats.live = live.len();
    info!(live = live.len(), "fsck done");

    token.check()?;
    let live_set: HashSet<&str> = live.iter().map(String::as_str).collect();
    let mut unused = Vec::new();
    for blobpath in &all {
        if live_set.contains(blobpath.as_str()) {
            continue;
        }
        if is_metadata_blobpath(blobpath) {
            debug!(%blobpath, "reserved metadata blob kept");
            stats.reserved += 1;
            continue;
        }
        unused.push(blobpath.clone());
    }
    stats.unused = unused.len();
    info!(unused = unused.len(), "sweep set computed");

    for blobpath in &unused {
        token.check()?;
        if dry_run {
            info!(%blobpath, "dry run: would remove unused blob");
        } else {
            info!(%blobpath, "removing unused blob");
            bs.remove_blob(blobpath)?;
            stats.removed += 1;
        }
    }

    info!(removed = stats.removed, dry_run, "blobstore GC done");
    Ok(stats)
}
