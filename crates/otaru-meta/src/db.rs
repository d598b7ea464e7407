//! The inode DB handler: transactions, node locks, snapshot + tx-log sync.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MetaError, MetaResult};
use crate::fsck;
use crate::node::Node;
use crate::ops::DbOperation;
use crate::snapshot::SnapshotIo;
use crate::state::{DbStateData, LockTable};
use crate::transaction::DbTransaction;
use crate::txlog::TxLogIo;
use crate::types::{
    NodeId, NodeLock, Ticket, Timestamp, TxId, ALLOCATE_NEW_NODE_ID, ANY_VERSION,
};

/// The surface the storage layer depends on.
pub trait DbHandler: Send + Sync {
    /// Applies a transaction atomically and returns the assigned TxID.
    /// On failure the intermediate state is rolled back.
    fn apply_transaction(&self, tx: DbTransaction) -> MetaResult<TxId>;

    /// Returns a read-only snapshot of the node, plus a lock. With
    /// `acquire_write`, a fresh exclusive ticket is issued if no writer
    /// holds the node; otherwise the returned lock is shared.
    fn query_node(&self, id: NodeId, acquire_write: bool) -> MetaResult<(Node, NodeLock)>;

    /// Acquires an exclusive lock on `id`. Passing
    /// [`ALLOCATE_NEW_NODE_ID`] reserves a fresh node ID and locks it.
    fn lock_node(&self, id: NodeId) -> MetaResult<NodeLock>;

    /// Releases a lock acquired from this handler.
    fn unlock_node(&self, nlock: NodeLock) -> MetaResult<()>;

    /// Walks all nodes reachable from the root, returning every live
    /// chunk blobpath and any inconsistencies found.
    fn fsck(&self) -> MetaResult<(Vec<String>, Vec<MetaError>)>;
}

/// Point-in-time statistics of the DB service.
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    /// Highest node ID handed out.
    pub last_id: NodeId,
    /// TxID of the last applied transaction.
    pub version: TxId,
    /// Most recently issued lock ticket.
    pub last_ticket: Ticket,
    /// Live exclusive lock count.
    pub number_of_node_locks: usize,
    /// When the last snapshot sync completed.
    pub last_sync: Timestamp,
    /// When the last transaction committed.
    pub last_tx: Timestamp,
}

struct Inner {
    state: DbStateData,
    locks: LockTable,
    snapshotted_version: TxId,
    last_sync: Timestamp,
    last_tx: Timestamp,
}

/// Transactional inode DB with write-ahead durability.
///
/// All access funnels through one mutex, serializing at the transaction
/// boundary. Queries clone node records out, so readers never hold DB
/// state across their own I/O.
pub struct InodeDb {
    inner: Mutex<Inner>,
    snapshot_io: Arc<dyn SnapshotIo>,
    txlog_io: Arc<dyn TxLogIo>,
}

impl InodeDb {
    /// Creates a fresh DB containing only the root directory. The
    /// initializing transaction is written to the tx log.
    pub fn new_empty(
        snapshot_io: Arc<dyn SnapshotIo>,
        txlog_io: Arc<dyn TxLogIo>,
    ) -> MetaResult<Self> {
        let db = Self {
            inner: Mutex::new(Inner {
                state: DbStateData::new(),
                locks: LockTable::new(),
                snapshotted_version: ANY_VERSION,
                last_sync: Timestamp::zero(),
                last_tx: Timestamp::zero(),
            }),
            snapshot_io,
            txlog_io,
        };
        db.apply_transaction(DbTransaction::new(vec![DbOperation::InitializeFs]))?;
        info!("initialized empty inode DB");
        Ok(db)
    }

    /// Restores the latest snapshot and replays the tx-log tail over it.
    pub fn restore(
        snapshot_io: Arc<dyn SnapshotIo>,
        txlog_io: Arc<dyn TxLogIo>,
    ) -> MetaResult<Self> {
        let mut state = snapshot_io
            .restore_snapshot()?
            .ok_or(MetaError::NoSnapshot)?;
        let snapshotted_version = state.version;

        let tail = txlog_io.query_transactions(TxId(snapshotted_version.0 + 1))?;
        let replayed = tail.len();
        for tx in tail {
            for op in &tx.ops {
                op.apply(&mut state, None)?;
            }
            state.version = tx.txid;
        }

        info!(
            snapshot_version = %snapshotted_version,
            replayed, version = %state.version,
            "restored inode DB"
        );

        Ok(Self {
            inner: Mutex::new(Inner {
                state,
                locks: LockTable::new(),
                snapshotted_version,
                last_sync: Timestamp::zero(),
                last_tx: Timestamp::zero(),
            }),
            snapshot_io,
            txlog_io,
        })
    }

    /// Persists a full state snapshot. Transactions with IDs at or below
    /// the snapshotted version become discardable from the tx log.
    pub fn sync(&self) -> MetaResult<()> {
        let mut inner = self.inner.lock();
        self.snapshot_io.save_snapshot(&inner.state)?;
        inner.snapshotted_version = inner.state.version;
        inner.last_sync = Timestamp::now();
        info!(version = %inner.state.version, "inode DB snapshot persisted");
        Ok(())
    }

    /// Smallest TxID the tx log must retain. Everything strictly below is
    /// captured by a durable snapshot. Returns [`ANY_VERSION`] when no
    /// snapshot has been persisted yet (nothing is safely discardable).
    pub fn find_unneeded_tx_threshold(&self) -> TxId {
        let inner = self.inner.lock();
        if inner.snapshotted_version == ANY_VERSION {
            ANY_VERSION
        } else {
            TxId(inner.snapshotted_version.0 + 1)
        }
    }

    /// Service statistics snapshot.
    pub fn stats(&self) -> DbStats {
        let inner = self.inner.lock();
        DbStats {
            last_id: inner.state.last_id,
            version: inner.state.version,
            last_ticket: inner.locks.last_ticket(),
            number_of_node_locks: inner.locks.len(),
            last_sync: inner.last_sync,
            last_tx: inner.last_tx,
        }
    }
}

impl DbHandler for InodeDb {
    fn apply_transaction(&self, mut tx: DbTransaction) -> MetaResult<TxId> {
        let mut inner = self.inner.lock();
        let txid = TxId(inner.state.version.0 + 1);
        tx.txid = txid;

        // validate and apply against a scratch copy; an op failure means
        // the committed state is untouched
        let Inner { state, locks, .. } = &mut *inner;
        let mut scratch = state.clone();
        for op in &tx.ops {
            if let Err(e) = op.apply(&mut scratch, Some(locks)) {
                debug!(%tx, error = %e, "transaction rolled back");
                return Err(e);
            }
        }
        scratch.version = txid;

        self.txlog_io.append_transaction(&tx)?;
        inner.state = scratch;
        inner.last_tx = Timestamp::now();
        debug!(%txid, ops = tx.ops.len(), "transaction committed");
        Ok(txid)
    }

    fn query_node(&self, id: NodeId, acquire_write: bool) -> MetaResult<(Node, NodeLock)> {
        let mut inner = self.inner.lock();
        let node = inner
            .state
            .nodes
            .get(&id)
            .cloned()
            .ok_or(MetaError::NotFound { id })?;

        let nlock = if acquire_write {
            match inner.locks.acquire(id) {
                Ok(nlock) => nlock,
                Err(MetaError::LockContended { .. }) => {
                    // lost the race to another writer; caller gets a
                    // shared view and may retry
                    debug!(%id, "write lock contended, returning shared lock");
                    NodeLock::shared(id)
                }
                Err(e) => return Err(e),
            }
        } else {
            NodeLock::shared(id)
        };

        Ok((node, nlock))
    }

    fn lock_node(&self, id: NodeId) -> MetaResult<NodeLock> {
        let mut inner = self.inner.lock();
        if id == ALLOCATE_NEW_NODE_ID {
            let txid = TxId(inner.state.version.0 + 1);
            let tx = DbTransaction {
                txid,
                ops: vec![DbOperation::AllocateNodeId],
            };
            // the allocation is logged so replay reproduces the ID
            // high-water mark
            self.txlog_io.append_transaction(&tx)?;
            let Inner { state, locks, .. } = &mut *inner;
            DbOperation::AllocateNodeId.apply(state, Some(locks))?;
            state.version = txid;

            let new_id = state.last_id;
            let nlock = locks.acquire(new_id)?;
            debug!(id = %new_id, "allocated and locked fresh node id");
            return Ok(nlock);
        }

        inner.locks.acquire(id)
    }

    fn unlock_node(&self, nlock: NodeLock) -> MetaResult<()> {
        let mut inner = self.inner.lock();
        if let Err(e) = inner.locks.release(nlock) {
            warn!(id = %nlock.id, error = %e, "unlock failed");
            return Err(e);
        }
        Ok(())
    }

    fn fsck(&self) -> MetaResult<(Vec<String>, Vec<MetaError>)> {
        let inner = self.inner.lock();
        Ok(fsck::fsck(&inner.state))
    }
}
