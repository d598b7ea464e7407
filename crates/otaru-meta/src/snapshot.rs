//! Pluggable snapshot persistence for the inode DB.

use parking_lot::Mutex;

use crate::error::{MetaError, MetaResult};
use crate::state::DbStateData;

/// Persists and restores full DB state snapshots.
pub trait SnapshotIo: Send + Sync {
    /// Persists a full state snapshot (including its version).
    fn save_snapshot(&self, state: &DbStateData) -> MetaResult<()>;

    /// Restores the latest snapshot, or `None` if none was ever saved.
    fn restore_snapshot(&self) -> MetaResult<Option<DbStateData>>;
}

/// In-memory snapshot store holding the serialized bytes, for tests.
///
/// Serializes through `bincode` like the durable implementations, so a
/// state that cannot round-trip fails here too.
pub struct MemSnapshotIo {
    buf: Mutex<Option<Vec<u8>>>,
}

impl MemSnapshotIo {
    /// Creates an empty snapshot store.
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(None),
        }
    }

    /// True if a snapshot has been saved.
    pub fn has_snapshot(&self) -> bool {
        self.buf.lock().is_some()
    }
}

impl Default for MemSnapshotIo {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotIo for MemSnapshotIo {
    fn save_snapshot(&self, state: &DbStateData) -> MetaResult<()> {
        let bytes = bincode::serialize(state).map_err(|e| MetaError::SerializationError {
            reason: e.to_string(),
        })?;
        *self.buf.lock() = Some(bytes);
        Ok(())
    }

    fn restore_snapshot(&self) -> MetaResult<Option<DbStateData>> {
        match self.buf.lock().as_ref() {
            None => Ok(None),
            Some(bytes) => {
                let state =
                    bincode::deserialize(bytes).map_err(|e| MetaError::SerializationError {
                        reason: e.to_string(),
                    })?;
                Ok(Some(state))
            }
        }
    }
}
