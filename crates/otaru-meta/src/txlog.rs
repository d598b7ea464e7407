//! Pluggable transaction log persistence for the inode DB.

use parking_lot::RwLock;

use crate::error::{MetaError, MetaResult};
use crate::transaction::DbTransaction;
use crate::types::TxId;

/// Append-only transaction log.
pub trait TxLogIo: Send + Sync {
    /// Appends a committed transaction.
    fn append_transaction(&self, tx: &DbTransaction) -> MetaResult<()>;

    /// Returns all stored transactions with `txid >= min`, in order.
    fn query_transactions(&self, min: TxId) -> MetaResult<Vec<DbTransaction>>;

    /// Deletes all stored transactions with `txid < threshold`.
    fn delete_transactions(&self, threshold: TxId) -> MetaResult<()>;
}

/// In-memory tx log, for tests.
pub struct MemTxLogIo {
    txs: RwLock<Vec<DbTransaction>>,
    read_only: RwLock<bool>,
}

impl MemTxLogIo {
    /// Creates an empty, writable log.
    pub fn new() -> Self {
        Self {
            txs: RwLock::new(Vec::new()),
            read_only: RwLock::new(false),
        }
    }

    /// Toggles read-only mode; appends fail while set.
    pub fn set_read_only(&self, ro: bool) {
        *self.read_only.write() = ro;
    }

    /// Number of stored transactions.
    pub fn len(&self) -> usize {
        self.txs.read().len()
    }

    /// True if no transactions are stored.
    pub fn is_empty(&self) -> bool {
        self.txs.read().is_empty()
    }
}

impl Default for MemTxLogIo {
    fn default() -> Self {
        Self::new()
    }
}

impl TxLogIo for MemTxLogIo {
    fn append_transaction(&self, tx: &DbTransaction) -> MetaResult<()> {
        if *self.read_only.read() {
            return Err(MetaError::ReadOnlyStore);
        }
        self.txs.write().push(tx.clone());
        Ok(())
    }

    fn query_transactions(&self, min: TxId) -> MetaResult<Vec<DbTransaction>> {
        Ok(self
            .txs
            .read()
            .iter()
            .filter(|tx| tx.txid >= min)
            .cloned()
            .collect())
    }

    fn delete_transactions(&self, threshold: TxId) -> MetaResult<()> {
        if *self.read_only.read() {
            return Err(MetaError::ReadOnlyStore);
        }
        self.txs.write().retain(|tx| tx.txid >= threshold);
        Ok(())
    }
}
