//! Blobstore-backed durability for the inode DB: the state snapshot and
//! the transaction log, both stored as encrypted chunk containers under
//! reserved `META_` blobpaths.

use std::sync::Arc;

use otaru_blob::{BlobError, BlobStore, OpenFlags, INODEDB_SNAPSHOT_BLOBPATH};
use otaru_chunk::{ChunkReader, ChunkWriter};
use otaru_crypt::Cipher;
use otaru_meta::{DbStateData, DbTransaction, MetaError, MetaResult, SnapshotIo, TxId, TxLogIo};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Blobpath of the serialized transaction log.
pub const INODEDB_TXLOG_BLOBPATH: &str = "META_INODEDB_TXLOG";

fn store_err(e: BlobError) -> MetaError {
    MetaError::Internal { msg: e.to_string() }
}

fn chunk_err(e: otaru_chunk::ChunkError) -> MetaError {
    MetaError::Internal { msg: e.to_string() }
}

fn write_meta_blob(
    bs: &dyn BlobStore,
    cipher: &Cipher,
    blobpath: &str,
    payload: &[u8],
) -> MetaResult<()> {
    let flags = OpenFlags::RDWR
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE);
    let bh = bs.open(blobpath, flags).map_err(store_err)?;
    let mut w = ChunkWriter::new(&*bh, cipher, 0, blobpath, payload.len() as u64)
        .map_err(chunk_err)?;
    w.write(payload).map_err(chunk_err)?;
    w.finish().map_err(chunk_err)
}

fn read_meta_blob(
    bs: &dyn BlobStore,
    cipher: &Cipher,
    blobpath: &str,
) -> MetaResult<Option<Vec<u8>>> {
    let bh = match bs.open(blobpath, OpenFlags::RDONLY) {
        Ok(bh) => bh,
        Err(BlobError::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(store_err(e)),
    };
    let mut reader = ChunkReader::new(&*bh, cipher).map_err(chunk_err)?;
    Ok(Some(reader.read_all().map_err(chunk_err)?))
}

/// Inode DB snapshots serialized with `bincode` and sealed into the
/// `META_INODEDB_SNAPSHOT` chunk container.
pub struct BlobSnapshotIo {
    bs: Arc<dyn BlobStore>,
    cipher: Cipher,
}

impl BlobSnapshotIo {
    /// Creates snapshot IO over `bs`.
    pub fn new(bs: Arc<dyn BlobStore>, cipher: &Cipher) -> Self {
        Self {
            bs,
            cipher: cipher.clone(),
        }
    }
}

impl SnapshotIo for BlobSnapshotIo {
    fn save_snapshot(&self, state: &DbStateData) -> MetaResult<()> {
        let bytes = bincode::serialize(state).map_err(|e| MetaError::SerializationError {
            reason: e.to_string(),
        })?;
        write_meta_blob(&*self.bs, &self.cipher, INODEDB_SNAPSHOT_BLOBPATH, &bytes)?;
        info!(bytes = bytes.len(), version = %state.version, "snapshot saved");
        Ok(())
    }

    fn restore_snapshot(&self) -> MetaResult<Option<DbStateData>> {
        let bytes = match read_meta_blob(&*self.bs, &self.cipher, INODEDB_SNAPSHOT_BLOBPATH)? {
            None => return Ok(None),
            Some(b) => b,
        };
        let state = bincode::deserialize(&bytes).map_err(|e| MetaError::SerializationError {
            reason: e.to_string(),
        })?;
        Ok(Some(state))
    }
}

/// Transaction log stored as one JSON-encoded chunk container at
/// `META_INODEDB_TXLOG`, with a write-through in-memory cache.
///
/// The whole log is rewritten per append; the tx-log GC keeps the tail
/// short by discarding entries captured in a snapshot.
pub struct BlobTxLogIo {
    bs: Arc<dyn BlobStore>,
    cipher: Cipher,
    cache: Mutex<Option<Vec<DbTransaction>>>,
}

impl BlobTxLogIo {
    /// Creates tx-log IO over `bs`.
    pub fn new(bs: Arc<dyn BlobStore>, cipher: &Cipher) -> Self {
        Self {
            bs,
            cipher: cipher.clone(),
            cache: Mutex::new(None),
        }
    }

    fn load(&self, cache: &mut Option<Vec<DbTransaction>>) -> MetaResult<()> {
        if cache.is_some() {
            return Ok(());
        }
        let txs = match read_meta_blob(&*self.bs, &self.cipher, INODEDB_TXLOG_BLOBPATH)? {
            None => Vec::new(),
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| MetaError::SerializationError {
                    reason: e.to_string(),
                })?
            }
        };
        debug!(entries = txs.len(), "tx log loaded");
        *cache = Some(txs);
        Ok(())
    }

    fn store(&self, txs: &[DbTransaction]) -> MetaResult<()> {
        let bytes = serde_json::to_vec(txs).map_err(|e| MetaError::SerializationError {
            reason: e.to_string(),
        })?;
        write_meta_blob(&*self.bs, &self.cipher, INODEDB_TXLOG_BLOBPATH, &bytes)
    }
}

impl TxLogIo for BlobTxLogIo {
    fn append_transaction(&self, tx: &DbTransaction) -> MetaResult<()> {
        let mut cache = self.cache.lock();
        self.load(&mut cache)?;
        let txs = cache.as_mut().expect("cache loaded above");
        txs.push(tx.clone());
        self.store(txs)
    }

    fn query_transactions(&self, min: TxId) -> MetaResult<Vec<DbTransaction>> {
        let mut cache = self.cache.lock();
        self.load(&mut cache)?;
        Ok(cache
            .as_ref()
            .expect("cache loaded above")
            .iter()
            .filter(|tx| tx.txid >= min)
            .cloned()
            .collect())
    }

    fn delete_transactions(&self, threshold: TxId) -> MetaResult<()> {
        let mut cache = self.cache.lock();
        self.load(&mut cache)?;
        let txs = cache.as_mut().expect("cache loaded above");
        let before = txs.len();
        txs.retain(|tx| tx.txid >= threshold);
        if txs.len() != before {
            info!(
                removed = before - txs.len(),
                %threshold,
                "tx log entries discarded"
            );
        }
        self.store(txs)
    }
}
