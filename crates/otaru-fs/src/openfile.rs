//! Per-inode open-file state and file handles.
//!
//! All handles on one inode share a single `OpenFile`: one node lock, one
//! chunked I/O cursor, one write cache. Operations on an `OpenFile` are
//! serialized by its own mutex. The writer ticket is held while any write
//! handle is open and released (downgraded to a shared lock) when the
//! last writer closes, after flushing the write cache.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use otaru_blob::{BlobStore, OpenFlags};
use otaru_chunk::ChunkedFileIo;
use otaru_crypt::Cipher;
use otaru_meta::{
    DbHandler, DbOperation, DbTransaction, NodeId, NodeLock, NodeType, Timestamp,
};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::chunks_array::InodeDbChunksArrayIo;
use crate::error::{FsError, FsResult};
use crate::writecache::{FileWriteCache, WriteCacheConfig};

struct OfState {
    nlock: Option<NodeLock>,
    cfio: Option<Arc<ChunkedFileIo>>,
    wc: FileWriteCache,
    handles: Vec<(u64, OpenFlags)>,
    next_handle_id: u64,
}

/// Shared open-file entry for one inode.
pub struct OpenFile {
    id: NodeId,
    idb: Arc<dyn DbHandler>,
    bs: Arc<dyn BlobStore>,
    cipher: Cipher,
    orig_filename: Mutex<String>,
    state: Mutex<OfState>,
}

impl OpenFile {
    pub(crate) fn new(
        id: NodeId,
        idb: Arc<dyn DbHandler>,
        bs: Arc<dyn BlobStore>,
        cipher: Cipher,
        wc_config: WriteCacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            idb,
            bs,
            cipher,
            orig_filename: Mutex::new("<unknown>".to_string()),
            state: Mutex::new(OfState {
                nlock: None,
                cfio: None,
                wc: FileWriteCache::with_config(wc_config),
                handles: Vec::with_capacity(1),
                next_handle_id: 1,
            }),
        })
    }

    /// The inode this entry serves.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Number of live handles.
    pub fn handle_count(&self) -> usize {
        self.state.lock().handles.len()
    }

    fn build_cfio(&self, nlock: NodeLock) -> Arc<ChunkedFileIo> {
        let caio = Arc::new(InodeDbChunksArrayIo::new(self.idb.clone(), nlock));
        let cfio = Arc::new(ChunkedFileIo::new(self.bs.clone(), &self.cipher, caio));
        cfio.set_orig_filename(&self.orig_filename.lock());
        cfio
    }

    /// Opens a new handle, acquiring or upgrading the node lock as the
    /// requested flags demand.
    pub(crate) fn open_handle(
        self: &Arc<Self>,
        flags: OpenFlags,
        orig_path: &str,
    ) -> FsResult<FileHandle> {
        let acquire_write = flags.is_write_allowed();
        let mut st = self.state.lock();

        let usable_as_is = match st.nlock {
            Some(nlock) => nlock.has_ticket() || !acquire_write,
            None => false,
        };

        if !usable_as_is {
            // acquire a new lock, or upgrade by re-querying with write
            let (node, nlock) = self.idb.query_node(self.id, acquire_write)?;
            if node.node_type() != NodeType::File {
                if nlock.has_ticket() {
                    if let Err(e) = self.idb.unlock_node(nlock) {
                        warn!(id = %self.id, error = %e, "unlock after kind mismatch failed");
                    }
                }
                return Err(FsError::IsDir { id: self.id });
            }
            *self.orig_filename.lock() = orig_path.to_string();
            st.nlock = Some(nlock);
            if let Some(old) = st.cfio.take() {
                if let Err(e) = old.close() {
                    warn!(id = %self.id, error = %e, "closing stale chunk io failed");
                }
            }
            st.cfio = Some(self.build_cfio(nlock));
            debug!(id = %self.id, ticket = nlock.ticket.0, "open-file lock bound");
        }

        if flags.is_write_truncate() && flags.is_write_allowed() {
            if let Err(e) = self.truncate_locked(&mut st, 0) {
                // do not leak the writer ticket on the error path
                if st.handles.is_empty() {
                    self.downgrade_locked(&mut st);
                }
                return Err(e);
            }
        }

        let handle_id = st.next_handle_id;
        st.next_handle_id += 1;
        st.handles.push((handle_id, flags));

        Ok(FileHandle {
            of: self.clone(),
            handle_id,
            flags,
            closed: AtomicBool::new(false),
        })
    }

    /// Detaches a handle. Returns true when the entry is empty and should
    /// be dropped from the open-file table.
    pub(crate) fn close_handle_inner(&self, handle_id: u64, flags: OpenFlags) -> bool {
        let mut st = self.state.lock();

        let pos = match st.handles.iter().position(|&(hid, _)| hid == handle_id) {
            Some(pos) => pos,
            None => {
                warn!(id = %self.id, handle_id, "close of untracked handle");
                return false;
            }
        };
        st.handles.remove(pos);

        let was_write = flags.is_write_allowed();
        let another_writer = st.handles.iter().any(|&(_, f)| f.is_write_allowed());

        if was_write && !another_writer {
            // last writer: flush buffered writes, then give up the ticket
            if let Err(e) = self.sync_locked(&mut st) {
                error!(id = %self.id, error = %e, "write cache flush on close failed");
            }
            self.downgrade_locked(&mut st);
        }

        if st.handles.is_empty() {
            if let Some(cfio) = st.cfio.take() {
                if let Err(e) = cfio.close() {
                    warn!(id = %self.id, error = %e, "chunk io close failed");
                }
            }
            st.nlock = None;
            true
        } else {
            false
        }
    }

    fn downgrade_locked(&self, st: &mut OfState) {
        let nlock = match st.nlock {
            Some(nlock) => nlock,
            None => return,
        };
        if !nlock.has_ticket() {
            warn!(id = %self.id, "downgrade requested but no exclusive lock held");
            return;
        }

        if let Err(e) = self.idb.unlock_node(nlock) {
            warn!(id = %self.id, error = %e, "releasing writer ticket failed");
        }

        let shared = NodeLock::shared(nlock.id);
        st.nlock = Some(shared);
        if let Some(cfio) = st.cfio.take() {
            if let Err(e) = cfio.close() {
                warn!(id = %self.id, error = %e, "chunk io close during downgrade failed");
            }
        }
        st.cfio = Some(self.build_cfio(shared));
        debug!(id = %self.id, "downgraded to shared lock");
    }

    fn size_from_db(&self) -> FsResult<u64> {
        let (node, _) = self.idb.query_node(self.id, false)?;
        match node.as_file() {
            Some(fnode) => Ok(fnode.size),
            None => Err(FsError::IsDir { id: self.id }),
        }
    }

    fn nlock_locked(&self, st: &OfState) -> FsResult<NodeLock> {
        st.nlock.ok_or_else(|| FsError::Internal {
            msg: format!("open file {} has no lock bound", self.id),
        })
    }

    fn update_size_locked(&self, st: &OfState, size: u64) -> FsResult<()> {
        let nlock = self.nlock_locked(st)?;
        self.idb.apply_transaction(DbTransaction::new(vec![
            DbOperation::UpdateSize { nlock, size },
            DbOperation::UpdateModifiedT {
                id: self.id,
                modified_t: Timestamp::now(),
            },
        ]))?;
        Ok(())
    }

    fn sync_locked(&self, st: &mut OfState) -> FsResult<()> {
        if st.wc.patch_count() == 0 {
            return Ok(());
        }
        let OfState { wc, cfio, .. } = st;
        let cfio = cfio.as_ref().ok_or_else(|| FsError::Internal {
            msg: "write cache spill with no chunk io".to_string(),
        })?;
        wc.sync(|offset, data| cfio.pwrite(offset, data).map_err(FsError::from))
    }

    /// Writes `p` at `offset` through the write cache.
    pub fn pwrite(&self, p: &[u8], offset: u64) -> FsResult<()> {
        if p.is_empty() {
            return Ok(());
        }
        let mut st = self.state.lock();
        let current_size = self.size_from_db()?;

        st.wc.pwrite(p, offset);
        if st.wc.needs_sync() {
            self.sync_locked(&mut st)?;
        }

        let right = offset + p.len() as u64;
        if right > current_size {
            self.update_size_locked(&st, right)?;
        } else {
            self.idb
                .apply_transaction(DbTransaction::new(vec![DbOperation::UpdateModifiedT {
                    id: self.id,
                    modified_t: Timestamp::now(),
                }]))?;
        }
        Ok(())
    }

    /// Appends `p` at the current end of file.
    pub fn append(&self, p: &[u8]) -> FsResult<()> {
        if p.is_empty() {
            return Ok(());
        }
        let mut st = self.state.lock();
        let current_size = self.size_from_db()?;

        st.wc.pwrite(p, current_size);
        if st.wc.needs_sync() {
            self.sync_locked(&mut st)?;
        }
        self.update_size_locked(&st, current_size + p.len() as u64)
    }

    /// Reads at `offset` through the write cache. Returns the byte count;
    /// short counts mean end of file.
    pub fn read_at(&self, p: &mut [u8], offset: u64) -> FsResult<usize> {
        let st = self.state.lock();
        let size = self.size_from_db()?;
        if p.is_empty() || offset >= size {
            return Ok(0);
        }

        let want = p.len().min((size - offset) as usize);
        let cfio = st.cfio.as_ref().ok_or_else(|| FsError::Internal {
            msg: "read with no chunk io".to_string(),
        })?;
        st.wc.read_through(&mut p[..want], offset, |buf, off| {
            cfio.read_at(buf, off).map_err(FsError::from)
        })?;
        Ok(want)
    }

    /// Flushes the write cache through the chunk layer.
    pub fn sync(&self) -> FsResult<()> {
        let mut st = self.state.lock();
        self.sync_locked(&mut st)
    }

    /// Logical file size from the inode DB.
    pub fn size(&self) -> FsResult<u64> {
        self.size_from_db()
    }

    /// Truncates the file to `newsize`.
    pub fn truncate(&self, newsize: u64) -> FsResult<()> {
        let mut st = self.state.lock();
        self.truncate_locked(&mut st, newsize)
    }

    fn truncate_locked(&self, st: &mut OfState, newsize: u64) -> FsResult<()> {
        let oldsize = self.size_from_db()?;

        if newsize > oldsize {
            // growing materializes nothing; the tail is an implicit hole
            self.update_size_locked(st, newsize)
        } else if newsize < oldsize {
            st.wc.truncate(newsize);
            let cfio = st.cfio.as_ref().ok_or_else(|| FsError::Internal {
                msg: "truncate with no chunk io".to_string(),
            })?;
            cfio.truncate(newsize)?;
            self.update_size_locked(st, newsize)
        } else {
            Ok(())
        }
    }
}

/// One opened handle on a file.
///
/// Carries the open flags; wrong-mode I/O is rejected with `BadHandle`.
/// Closing twice is detected and ignored.
pub struct FileHandle {
    pub(crate) of: Arc<OpenFile>,
    pub(crate) handle_id: u64,
    flags: OpenFlags,
    pub(crate) closed: AtomicBool,
}

impl FileHandle {
    /// The inode this handle refers to.
    pub fn id(&self) -> NodeId {
        self.of.id()
    }

    /// The flags the handle was opened with.
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    fn ensure_open(&self) -> FsResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FsError::BadHandle {
                msg: "handle is closed".to_string(),
            });
        }
        Ok(())
    }

    /// Writes through the shared open-file entry. Append-mode handles
    /// write at the current end of file regardless of `offset`.
    pub fn pwrite(&self, p: &[u8], offset: u64) -> FsResult<()> {
        self.ensure_open()?;
        if !self.flags.is_write_allowed() {
            return Err(FsError::BadHandle {
                msg: "handle not open for writing".to_string(),
            });
        }
        if self.flags.is_append() {
            return self.of.append(p);
        }
        self.of.pwrite(p, offset)
    }

    /// Reads through the shared open-file entry.
    pub fn read_at(&self, p: &mut [u8], offset: u64) -> FsResult<usize> {
        self.ensure_open()?;
        if !self.flags.is_read_allowed() {
            return Err(FsError::BadHandle {
                msg: "handle not open for reading".to_string(),
            });
        }
        self.of.read_at(p, offset)
    }

    /// Flushes buffered writes. A no-op for read-only handles.
    pub fn sync(&self) -> FsResult<()> {
        self.ensure_open()?;
        if !self.flags.is_write_allowed() {
            return Ok(());
        }
        self.of.sync()
    }

    /// Logical file size.
    pub fn size(&self) -> FsResult<u64> {
        self.ensure_open()?;
        self.of.size()
    }

    /// Truncates the file.
    pub fn truncate(&self, newsize: u64) -> FsResult<()> {
        self.ensure_open()?;
        if !self.flags.is_write_allowed() {
            return Err(FsError::BadHandle {
                msg: "handle not open for writing".to_string(),
            });
        }
        self.of.truncate(newsize)
    }
}
