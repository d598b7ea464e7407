//! Transaction-log garbage collection.

use std::sync::atomic::{AtomicBool, Ordering};

use otaru_meta::{InodeDb, MetaResult, TxId, TxLogIo, ANY_VERSION};
use tracing::info;

use crate::cancel::CancelToken;
use crate::error::{GcError, GcResult};

/// Reports the smallest TxID the tx log must retain.
pub trait UnneededTxThresholdFinder {
    /// Threshold below which entries are captured by a durable snapshot;
    /// [`ANY_VERSION`] means nothing is safely discardable.
    fn find_unneeded_tx_threshold(&self) -> TxId;
}

impl UnneededTxThresholdFinder for InodeDb {
    fn find_unneeded_tx_threshold(&self) -> TxId {
        InodeDb::find_unneeded_tx_threshold(self)
    }
}

/// Deletes transaction log entries below a threshold.
pub trait TxLogDeleter {
    /// Deletes all entries with `txid < threshold`.
    fn delete_transactions(&self, threshold: TxId) -> MetaResult<()>;
}

impl<T: TxLogIo + ?Sized> TxLogDeleter for T {
    fn delete_transactions(&self, threshold: TxId) -> MetaResult<()> {
        TxLogIo::delete_transactions(self, threshold)
    }
}

static GC_RUNNING: AtomicBool = AtomicBool::new(false);

/// Discards tx-log entries whose effects are captured in a persisted
/// snapshot.
///
/// A no-op when the threshold finder reports [`ANY_VERSION`]. At most one
/// run at a time; a concurrent call fails with `AlreadyRunning`. Honors
/// `dry_run` and the cancellation token. Returns the threshold used, or
/// `None` when nothing was discardable.
pub fn gc_txlog(
    token: &CancelToken,
    finder: &dyn UnneededTxThresholdFinder,
    deleter: &dyn TxLogDeleter,
    dry_run: bool,
) -> GcResult<Option<TxId>> {
    if GC_RUNNING
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(GcError::AlreadyRunning);
    }
    let result = gc_txlog_inner(token, finder, deleter, dry_run);
    GC_RUNNING.store(false, Ordering::SeqCst);
    result
}

fn gc_txlog_inner(
    token: &CancelToken,
    finder: &dyn UnneededTxThresholdFinder,
    deleter: &dyn TxLogDeleter,
    dry_run: bool,
) -> GcResult<Option<TxId>> {
    info!(dry_run, "tx-log GC start");

    let threshold = finder.find_unneeded_tx_threshold();
    if threshold == ANY_VERSION {
        info!("threshold is AnyVersion; no tx log entries to delete");
        return Ok(None);
    }
    info!(%threshold, "found unneeded TxID threshold");

    token.check()?;

    if dry_run {
        info!(%threshold, "dry run: not deleting tx log entries");
    } else {
        deleter.delete_transactions(threshold)?;
    }

    info!(dry_run, "tx-log GC done");
    Ok(Some(threshold))
}
