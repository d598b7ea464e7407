//! The filesystem facade: path resolution, node lifecycle, attribute
//! projection, and the open-file table.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use otaru_blob::{BlobStore, OpenFlags};
use otaru_crypt::Cipher;
use otaru_meta::{
    DbHandler, DbOperation, DbTransaction, InodeDb, MetaError, NodeId, NodeLock, NodeType,
    Timestamp, TxId, ALLOCATE_NEW_NODE_ID,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{FsError, FsResult};
use crate::openfile::{FileHandle, OpenFile};
use crate::persist::{BlobSnapshotIo, BlobTxLogIo};
use crate::writecache::WriteCacheConfig;

/// Projected node attributes.
#[derive(Debug, Clone, Serialize)]
pub struct Attr {
    /// Node ID.
    pub id: NodeId,
    /// File or directory.
    pub node_type: NodeType,
    /// Logical size; zero for directories.
    pub size: u64,
    /// Best-effort original path.
    pub orig_path: String,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Permission bits, masked by the store's access flags.
    pub perm_mode: u16,
    /// Last modification time.
    pub modified_t: Timestamp,
}

/// Selects which [`Attr`] fields a `set_attr` call applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrFields(u32);

impl AttrFields {
    /// No fields.
    pub const NONE: AttrFields = AttrFields(0);
    /// Owner user ID.
    pub const UID: AttrFields = AttrFields(1 << 0);
    /// Owner group ID.
    pub const GID: AttrFields = AttrFields(1 << 1);
    /// Permission bits.
    pub const PERM_MODE: AttrFields = AttrFields(1 << 2);
    /// Modification time.
    pub const MODIFIED_T: AttrFields = AttrFields(1 << 3);

    /// Combines field selections.
    pub const fn union(self, other: AttrFields) -> AttrFields {
        AttrFields(self.0 | other.0)
    }

    /// True if `other`'s bits are all selected.
    pub fn contains(self, other: AttrFields) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Counters exposed for introspection.
#[derive(Debug, Clone, Serialize)]
pub struct FileSystemStats {
    /// Live open-file entries.
    pub num_open_files: usize,
    /// Cached orig-path entries.
    pub num_orig_path: usize,
}

/// The encrypted filesystem: inode DB + chunk layer behind a POSIX-style
/// surface.
pub struct FileSystem {
    idb: Arc<InodeDb>,
    bs: Arc<dyn BlobStore>,
    cipher: Cipher,
    wc_config: WriteCacheConfig,
    open_files: DashMap<NodeId, Arc<OpenFile>>,
    orig_path: DashMap<NodeId, String>,
}

fn join_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

impl FileSystem {
    /// Creates a filesystem over `bs` with a freshly initialized inode DB.
    /// The DB snapshot and tx log persist to `META_` blobs in the store.
    pub fn new_empty(bs: Arc<dyn BlobStore>, cipher: Cipher) -> FsResult<Self> {
        let snapshot_io = Arc::new(BlobSnapshotIo::new(bs.clone(), &cipher));
        let txlog_io = Arc::new(BlobTxLogIo::new(bs.clone(), &cipher));
        let idb = Arc::new(InodeDb::new_empty(snapshot_io, txlog_io)?);
        Ok(Self::with_db(idb, bs, cipher))
    }

    /// Opens an existing filesystem: restores the inode DB snapshot from
    /// the store and replays the tx-log tail.
    pub fn from_snapshot(bs: Arc<dyn BlobStore>, cipher: Cipher) -> FsResult<Self> {
        let snapshot_io = Arc::new(BlobSnapshotIo::new(bs.clone(), &cipher));
        let txlog_io = Arc::new(BlobTxLogIo::new(bs.clone(), &cipher));
        let idb = Arc::new(InodeDb::restore(snapshot_io, txlog_io)?);
        Ok(Self::with_db(idb, bs, cipher))
    }

    /// Composes a filesystem from an already-built inode DB.
    pub fn with_db(idb: Arc<InodeDb>, bs: Arc<dyn BlobStore>, cipher: Cipher) -> Self {
        let fs = Self {
            idb,
            bs,
            cipher,
            wc_config: WriteCacheConfig::default(),
            open_files: DashMap::new(),
            orig_path: DashMap::new(),
        };
        fs.set_orig_path_for_id(NodeId::ROOT, "/");
        fs
    }

    /// Overrides the write cache thresholds for subsequently opened files.
    pub fn set_write_cache_config(&mut self, config: WriteCacheConfig) {
        self.wc_config = config;
    }

    /// The inode DB backing this filesystem.
    pub fn idb(&self) -> &Arc<InodeDb> {
        &self.idb
    }

    fn try_get_orig_path(&self, id: NodeId) -> String {
        match self.orig_path.get(&id) {
            Some(p) => p.clone(),
            None => {
                warn!(%id, "orig path lookup miss");
                "<unknown>".to_string()
            }
        }
    }

    fn set_orig_path_for_id(&self, id: NodeId, orig_path: &str) {
        self.orig_path.insert(id, orig_path.to_string());
    }

    /// Introspection counters.
    pub fn stats(&self) -> FileSystemStats {
        FileSystemStats {
            num_open_files: self.open_files.len(),
            num_orig_path: self.orig_path.len(),
        }
    }

    /// Resolves an absolute path to a node ID, walking from the root.
    pub fn resolve_path(&self, path: &str) -> FsResult<NodeId> {
        if !path.starts_with('/') {
            return Err(FsError::InvalidArgument {
                msg: format!("path must be absolute: {:?}", path),
            });
        }

        let mut cur = NodeId::ROOT;
        let mut cur_path = "/".to_string();
        for comp in path.split('/').filter(|c| !c.is_empty()) {
            let (node, _) = self.idb.query_node(cur, false)?;
            let dnode = node.as_dir().ok_or_else(|| FsError::NotDir {
                msg: cur_path.clone(),
            })?;
            let child = *dnode.entries.get(comp).ok_or_else(|| FsError::NotFound {
                msg: join_path(&cur_path, comp),
            })?;
            cur_path = join_path(&cur_path, comp);
            self.set_orig_path_for_id(child, &cur_path);
            cur = child;
        }
        Ok(cur)
    }

    /// Lists a directory's entries, refreshing the orig-path cache for
    /// its children.
    pub fn dir_entries(&self, id: NodeId) -> FsResult<BTreeMap<String, NodeId>> {
        let (node, _) = self.idb.query_node(id, false)?;
        let dnode = node.as_dir().ok_or_else(|| FsError::NotDir {
            msg: format!("node {}", id),
        })?;

        let dir_path = self.try_get_orig_path(id);
        for (name, &child) in &dnode.entries {
            self.set_orig_path_for_id(child, &join_path(&dir_path, name));
        }

        Ok(dnode.entries.clone())
    }

    /// Parent of a directory node.
    pub fn parent_id(&self, id: NodeId) -> FsResult<NodeId> {
        let (node, _) = self.idb.query_node(id, false)?;
        match node.as_dir() {
            Some(dnode) => Ok(dnode.parent_id),
            None => Err(FsError::NotDir {
                msg: format!("node {}", id),
            }),
        }
    }

    /// True if `id` is a directory.
    pub fn is_dir(&self, id: NodeId) -> FsResult<bool> {
        let (node, _) = self.idb.query_node(id, false)?;
        Ok(node.node_type() == NodeType::Dir)
    }

    /// Projects a node's attributes. The permission bits are masked by
    /// the blob store's access flags: a read-only store shows no write
    /// bits.
    pub fn attr(&self, id: NodeId) -> FsResult<Attr> {
        let (node, _) = self.idb.query_node(id, false)?;
        let size = node.as_file().map(|f| f.size).unwrap_or(0);
        Ok(Attr {
            id: node.id(),
            node_type: node.node_type(),
            size,
            orig_path: node.orig_path().to_string(),
            uid: node.uid(),
            gid: node.gid(),
            perm_mode: self.bs.flags().mask_perm_mode(node.perm_mode()),
            modified_t: node.modified_t(),
        })
    }

    /// Applies the selected attribute fields in one transaction.
    pub fn set_attr(&self, id: NodeId, attr: &Attr, valid: AttrFields) -> FsResult<()> {
        info!(%id, ?valid, "set_attr");

        let mut ops: Vec<DbOperation> = Vec::with_capacity(4);
        if valid.contains(AttrFields::UID) {
            ops.push(DbOperation::UpdateUid { id, uid: attr.uid });
        }
        if valid.contains(AttrFields::GID) {
            ops.push(DbOperation::UpdateGid { id, gid: attr.gid });
        }
        if valid.contains(AttrFields::PERM_MODE) {
            ops.push(DbOperation::UpdatePermMode {
                id,
                perm_mode: attr.perm_mode,
            });
        }
        if valid.contains(AttrFields::MODIFIED_T) {
            ops.push(DbOperation::UpdateModifiedT {
                id,
                modified_t: attr.modified_t,
            });
        }
        if ops.is_empty() {
            return Ok(());
        }

        self.idb.apply_transaction(DbTransaction::new(ops))?;
        Ok(())
    }

    fn create_node(
        &self,
        dir_id: NodeId,
        name: &str,
        node_type: NodeType,
        perm_mode: u16,
        uid: u32,
        gid: u32,
        modified_t: Timestamp,
    ) -> FsResult<NodeId> {
        let nlock = self.idb.lock_node(ALLOCATE_NEW_NODE_ID)?;

        let orig_path = join_path(&self.try_get_orig_path(dir_id), name);
        let result = self
            .idb
            .apply_transaction(DbTransaction::new(vec![
                DbOperation::CreateNode {
                    nlock,
                    orig_path: orig_path.clone(),
                    node_type,
                    parent_id: dir_id,
                    uid,
                    gid,
                    perm_mode,
                    modified_t,
                },
                DbOperation::HardLink {
                    nlock: NodeLock::shared(dir_id),
                    name: name.to_string(),
                    target_id: nlock.id,
                },
            ]))
            .map_err(FsError::from);

        if let Err(e) = self.idb.unlock_node(nlock) {
            warn!(id = %nlock.id, error = %e, "unlock after create failed");
        }

        result?;
        self.set_orig_path_for_id(nlock.id, &orig_path);
        debug!(id = %nlock.id, %orig_path, "created node");
        Ok(nlock.id)
    }

    /// Creates a file under `dir_id`.
    pub fn create_file(
        &self,
        dir_id: NodeId,
        name: &str,
        perm_mode: u16,
        uid: u32,
        gid: u32,
        modified_t: Timestamp,
    ) -> FsResult<NodeId> {
        self.create_node(dir_id, name, NodeType::File, perm_mode, uid, gid, modified_t)
    }

    /// Creates a directory under `dir_id`.
    pub fn create_dir(
        &self,
        dir_id: NodeId,
        name: &str,
        perm_mode: u16,
        uid: u32,
        gid: u32,
        modified_t: Timestamp,
    ) -> FsResult<NodeId> {
        self.create_node(dir_id, name, NodeType::Dir, perm_mode, uid, gid, modified_t)
    }

    /// Atomically moves `src_name` in `src_dir` to `dst_name` in `dst_dir`.
    /// The orig-path cache is refreshed lazily on the next listing.
    pub fn rename(
        &self,
        src_dir: NodeId,
        src_name: &str,
        dst_dir: NodeId,
        dst_name: &str,
    ) -> FsResult<()> {
        self.idb
            .apply_transaction(DbTransaction::new(vec![DbOperation::Rename {
                src_dir_id: src_dir,
                src_name: src_name.to_string(),
                dst_dir_id: dst_dir,
                dst_name: dst_name.to_string(),
            }]))?;
        Ok(())
    }

    /// Removes `name` from `dir`. The node becomes unreachable and its
    /// blobs are reclaimed by the next GC run.
    pub fn remove(&self, dir: NodeId, name: &str) -> FsResult<()> {
        self.idb
            .apply_transaction(DbTransaction::new(vec![DbOperation::Remove {
                nlock: NodeLock::shared(dir),
                name: name.to_string(),
            }]))?;
        Ok(())
    }

    /// Opens a handle on the file `id`.
    pub fn open_file(&self, id: NodeId, flags: OpenFlags) -> FsResult<FileHandle> {
        debug!(%id, %flags, "open_file");

        if flags.is_write_allowed() && !self.bs.flags().is_write_allowed() {
            return Err(FsError::PermissionDenied {
                op: "open for write on a read-only filesystem".to_string(),
            });
        }

        let of = self
            .open_files
            .entry(id)
            .or_insert_with(|| {
                OpenFile::new(
                    id,
                    self.idb.clone(),
                    self.bs.clone(),
                    self.cipher.clone(),
                    self.wc_config.clone(),
                )
            })
            .clone();

        let orig_path = self.try_get_orig_path(id);
        match of.open_handle(flags, &orig_path) {
            Ok(fh) => Ok(fh),
            Err(e) => {
                self.drop_open_file_if_idle(&of);
                Err(e)
            }
        }
    }

    /// Closes a handle. The write cache is flushed and the writer ticket
    /// downgraded when the last write handle closes; the entry is dropped
    /// when the last handle closes. Closing twice is a logged no-op.
    pub fn close_handle(&self, fh: &FileHandle) {
        if fh.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            warn!(id = %fh.id(), "file handle double close");
            return;
        }

        let of = fh.of.clone();
        if of.close_handle_inner(fh.handle_id, fh.flags()) {
            self.drop_open_file_if_idle(&of);
        }
    }

    fn drop_open_file_if_idle(&self, of: &Arc<OpenFile>) {
        self.open_files
            .remove_if(&of.id(), |_, v| Arc::ptr_eq(v, of) && v.handle_count() == 0);
    }

    /// Truncates the file `id` to `newsize`.
    pub fn truncate_file(&self, id: NodeId, newsize: u64) -> FsResult<()> {
        let fh = self.open_file(id, OpenFlags::WRONLY)?;
        let result = fh.truncate(newsize);
        self.close_handle(&fh);
        result
    }

    /// Flushes the file's buffered writes. A no-op on a read-only store.
    pub fn sync_file(&self, id: NodeId) -> FsResult<()> {
        if !self.bs.flags().is_write_allowed() {
            return Ok(());
        }
        let fh = self.open_file(id, OpenFlags::WRONLY)?;
        let result = fh.sync();
        self.close_handle(&fh);
        result
    }

    /// Syncs the inode DB (persisting a snapshot) and flushes every open
    /// file. Keeps going on per-file errors and returns the first one.
    pub fn sync(&self) -> FsResult<()> {
        let mut first_err: Option<FsError> = None;

        if let Err(e) = self.idb.sync() {
            first_err = Some(e.into());
        }

        let open: Vec<Arc<OpenFile>> =
            self.open_files.iter().map(|e| e.value().clone()).collect();
        for of in open {
            if let Err(e) = of.sync() {
                warn!(id = %of.id(), error = %e, "open file sync failed");
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Smallest TxID the tx log must retain; see the tx-log GC.
    pub fn find_unneeded_tx_threshold(&self) -> TxId {
        self.idb.find_unneeded_tx_threshold()
    }

    /// Runs the inode DB reachability walk.
    pub fn fsck(&self) -> FsResult<(Vec<String>, Vec<MetaError>)> {
        Ok(self.idb.fsck()?)
    }
}
