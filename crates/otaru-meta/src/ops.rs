//! Inode DB operations.
//!
//! Every mutation of the node map is one of these operations, applied
//! inside a transaction. Ops are pure functions of their fields — no clock
//! or randomness — so replaying the tx log over a snapshot reproduces the
//! exact same state.

use std::collections::BTreeMap;

use otaru_chunk::FileChunk;
use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};
use crate::node::{DirNode, FileNode, Node};
use crate::state::{DbStateData, LockTable};
use crate::types::{NodeId, NodeLock, NodeType, Timestamp};

/// One inode DB mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DbOperation {
    /// Creates the root directory in an empty DB.
    InitializeFs,

    /// Reserves a fresh node ID (bumps the high-water mark).
    AllocateNodeId,

    /// Creates a file or directory node under an exclusive ticket.
    CreateNode {
        /// Lock on the new node's ID (ticket required).
        nlock: NodeLock,
        /// Path recorded for recovery/debug.
        orig_path: String,
        /// File or directory.
        node_type: NodeType,
        /// Parent directory; meaningful for directories.
        parent_id: NodeId,
        /// Owner user ID.
        uid: u32,
        /// Owner group ID.
        gid: u32,
        /// Permission bits.
        perm_mode: u16,
        /// Creation timestamp.
        modified_t: Timestamp,
    },

    /// Attaches `name → target_id` under the directory `nlock.id`.
    HardLink {
        /// Lock token on the directory (shared suffices).
        nlock: NodeLock,
        /// Entry name.
        name: String,
        /// Node the name will point at.
        target_id: NodeId,
    },

    /// Removes the entry `name` from the directory `nlock.id`.
    Remove {
        /// Lock token on the directory (shared suffices).
        nlock: NodeLock,
        /// Entry name to remove.
        name: String,
    },

    /// Atomically moves a name between directories.
    Rename {
        /// Source directory.
        src_dir_id: NodeId,
        /// Name in the source directory.
        src_name: String,
        /// Destination directory.
        dst_dir_id: NodeId,
        /// Name in the destination directory.
        dst_name: String,
    },

    /// Sets the owner user ID.
    UpdateUid {
        /// Target node.
        id: NodeId,
        /// New owner user ID.
        uid: u32,
    },

    /// Sets the owner group ID.
    UpdateGid {
        /// Target node.
        id: NodeId,
        /// New owner group ID.
        gid: u32,
    },

    /// Sets the permission bits.
    UpdatePermMode {
        /// Target node.
        id: NodeId,
        /// New permission bits.
        perm_mode: u16,
    },

    /// Sets the modification timestamp.
    UpdateModifiedT {
        /// Target node.
        id: NodeId,
        /// New modification time.
        modified_t: Timestamp,
    },

    /// Sets a file's logical size under an exclusive ticket.
    UpdateSize {
        /// Lock on the file (ticket required).
        nlock: NodeLock,
        /// New logical size.
        size: u64,
    },

    /// Replaces a file's chunk index under an exclusive ticket.
    UpdateChunks {
        /// Lock on the file (ticket required).
        nlock: NodeLock,
        /// New chunk index.
        chunks: Vec<FileChunk>,
    },

    /// Always fails; exercises transaction rollback in tests.
    AlwaysFail,
}

fn check_lock(locks: Option<&LockTable>, nlock: NodeLock, require_ticket: bool) -> MetaResult<()> {
    match locks {
        // Replay path: the transaction was validated when it was first
        // committed, and no locks survive a restart.
        None => Ok(()),
        Some(lt) => lt.check(nlock, require_ticket),
    }
}

fn file_mut(state: &mut DbStateData, id: NodeId) -> MetaResult<&mut FileNode> {
    match state.nodes.get_mut(&id) {
        None => Err(MetaError::NotFound { id }),
        Some(Node::File(fnode)) => Ok(fnode),
        Some(Node::Dir(_)) => Err(MetaError::NotFile { id }),
    }
}

fn dir_mut(state: &mut DbStateData, id: NodeId) -> MetaResult<&mut DirNode> {
    match state.nodes.get_mut(&id) {
        None => Err(MetaError::NotFound { id }),
        Some(Node::Dir(dnode)) => Ok(dnode),
        Some(Node::File(_)) => Err(MetaError::NotDir { id }),
    }
}

impl DbOperation {
    /// Applies the operation to `state`, validating preconditions against
    /// `locks`. Pass `None` for `locks` when replaying the tx log.
    pub fn apply(&self, state: &mut DbStateData, locks: Option<&LockTable>) -> MetaResult<()> {
        match self {
            DbOperation::InitializeFs => {
                if !state.nodes.is_empty() || state.last_id != NodeId::new(0) {
                    return Err(MetaError::NotEmptyDb);
                }
                let root = Node::Dir(DirNode {
                    id: NodeId::ROOT,
                    orig_path: "/".to_string(),
                    uid: 0,
                    gid: 0,
                    perm_mode: 0o777,
                    modified_t: Timestamp::zero(),
                    parent_id: NodeId::ROOT,
                    entries: BTreeMap::new(),
                });
                state.add_new_node(root)?;
                Ok(())
            }

            DbOperation::AllocateNodeId => {
                state.last_id = NodeId::new(state.last_id.as_u64() + 1);
                Ok(())
            }

            DbOperation::CreateNode {
                nlock,
                orig_path,
                node_type,
                parent_id,
                uid,
                gid,
                perm_mode,
                modified_t,
            } => {
                check_lock(locks, *nlock, true)?;
                let node = match node_type {
                    NodeType::File => Node::File(FileNode {
                        id: nlock.id,
                        orig_path: orig_path.clone(),
                        uid: *uid,
                        gid: *gid,
                        perm_mode: *perm_mode,
                        modified_t: *modified_t,
                        size: 0,
                        chunks: Vec::new(),
                    }),
                    NodeType::Dir => Node::Dir(DirNode {
                        id: nlock.id,
                        orig_path: orig_path.clone(),
                        uid: *uid,
                        gid: *gid,
                        perm_mode: *perm_mode,
                        modified_t: *modified_t,
                        parent_id: *parent_id,
                        entries: BTreeMap::new(),
                    }),
                };
                state.add_new_node(node)
            }

            DbOperation::HardLink {
                nlock,
                name,
                target_id,
            } => {
                check_lock(locks, *nlock, false)?;
                if !state.nodes.contains_key(target_id) {
                    return Err(MetaError::NotFound { id: *target_id });
                }
                let dnode = dir_mut(state, nlock.id)?;
                if dnode.entries.contains_key(name) {
                    return Err(MetaError::AlreadyExists { name: name.clone() });
                }
                dnode.entries.insert(name.clone(), *target_id);
                Ok(())
            }

            DbOperation::Remove { nlock, name } => {
                check_lock(locks, *nlock, false)?;
                let target_id = {
                    let dnode = dir_mut(state, nlock.id)?;
                    match dnode.entries.get(name) {
                        None => return Err(MetaError::NameNotFound { name: name.clone() }),
                        Some(&id) => id,
                    }
                };

                if let Some(Node::Dir(child)) = state.nodes.get(&target_id) {
                    if !child.entries.is_empty() {
                        return Err(MetaError::NotEmpty { id: target_id });
                    }
                }

                let dnode = dir_mut(state, nlock.id)?;
                dnode.entries.remove(name);
                Ok(())
            }

            DbOperation::Rename {
                src_dir_id,
                src_name,
                dst_dir_id,
                dst_name,
            } => {
                check_lock(locks, NodeLock::shared(*src_dir_id), false)?;
                check_lock(locks, NodeLock::shared(*dst_dir_id), false)?;

                // both endpoints must be directories
                dir_mut(state, *dst_dir_id)?;
                let moved_id = {
                    let src = dir_mut(state, *src_dir_id)?;
                    match src.entries.get(src_name) {
                        None => {
                            return Err(MetaError::NameNotFound {
                                name: src_name.clone(),
                            })
                        }
                        Some(&id) => id,
                    }
                };

                if src_dir_id == dst_dir_id && src_name == dst_name {
                    return Ok(());
                }

                if let Some(Node::Dir(moved)) = state.nodes.get_mut(&moved_id) {
                    moved.parent_id = *dst_dir_id;
                }

                dir_mut(state, *src_dir_id)?.entries.remove(src_name);
                dir_mut(state, *dst_dir_id)?
                    .entries
                    .insert(dst_name.clone(), moved_id);
                Ok(())
            }

            DbOperation::UpdateUid { id, uid } => {
                match state.nodes.get_mut(id) {
                    None => return Err(MetaError::NotFound { id: *id }),
                    Some(Node::File(fnode)) => fnode.uid = *uid,
                    Some(Node::Dir(dnode)) => dnode.uid = *uid,
                }
                Ok(())
            }

            DbOperation::UpdateGid { id, gid } => {
                match state.nodes.get_mut(id) {
                    None => return Err(MetaError::NotFound { id: *id }),
                    Some(Node::File(fnode)) => fnode.gid = *gid,
                    Some(Node::Dir(dnode)) => dnode.gid = *gid,
                }
                Ok(())
            }

            DbOperation::UpdatePermMode { id, perm_mode } => {
                match state.nodes.get_mut(id) {
                    None => return Err(MetaError::NotFound { id: *id }),
                    Some(Node::File(fnode)) => fnode.perm_mode = *perm_mode,
                    Some(Node::Dir(dnode)) => dnode.perm_mode = *perm_mode,
                }
                Ok(())
            }

            DbOperation::UpdateModifiedT { id, modified_t } => {
                match state.nodes.get_mut(id) {
                    None => return Err(MetaError::NotFound { id: *id }),
                    Some(Node::File(fnode)) => fnode.modified_t = *modified_t,
                    Some(Node::Dir(dnode)) => dnode.modified_t = *modified_t,
                }
                Ok(())
            }

            DbOperation::UpdateSize { nlock, size } => {
                check_lock(locks, *nlock, true)?;
                let fnode = file_mut(state, nlock.id)?;
                fnode.size = *size;
                Ok(())
            }

            DbOperation::UpdateChunks { nlock, chunks } => {
                check_lock(locks, *nlock, true)?;
                let fnode = file_mut(state, nlock.id)?;
                fnode.chunks = chunks.clone();
                Ok(())
            }

            DbOperation::AlwaysFail => Err(MetaError::Forced),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LockTable;

    fn init_state() -> DbStateData {
        let mut s = DbStateData::new();
        DbOperation::InitializeFs.apply(&mut s, None).unwrap();
        s
    }

    fn create_file(s: &mut DbStateData, lt: &mut LockTable, name: &str) -> NodeId {
        DbOperation::AllocateNodeId.apply(s, Some(lt)).unwrap();
        let id = s.last_id;
        let nlock = lt.acquire(id).unwrap();
        DbOperation::CreateNode {
            nlock,
            orig_path: format!("/{}", name),
            node_type: NodeType::File,
            parent_id: NodeId::ROOT,
            uid: 1000,
            gid: 1000,
            perm_mode: 0o644,
            modified_t: Timestamp::zero(),
        }
        .apply(s, Some(lt))
        .unwrap();
        DbOperation::HardLink {
            nlock: NodeLock::shared(NodeId::ROOT),
            name: name.to_string(),
            target_id: id,
        }
        .apply(s, Some(lt))
        .unwrap();
        lt.release(nlock).unwrap();
        id
    }

    #[test]
    fn initialize_creates_root() {
        let s = init_state();
        let root = s.nodes.get(&NodeId::ROOT).unwrap();
        assert_eq!(root.node_type(), NodeType::Dir);
        assert_eq!(root.orig_path(), "/");
        assert_eq!(s.last_id, NodeId::ROOT);
    }

    #[test]
    fn initialize_refuses_nonempty() {
        let mut s = init_state();
        assert!(matches!(
            DbOperation::InitializeFs.apply(&mut s, None),
            Err(MetaError::NotEmptyDb)
        ));
    }

    #[test]
    fn create_and_link_file() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let id = create_file(&mut s, &mut lt, "hello.txt");

        let root = s.nodes.get(&NodeId::ROOT).unwrap().as_dir().unwrap();
        assert_eq!(root.entries.get("hello.txt"), Some(&id));
        assert_eq!(s.nodes.get(&id).unwrap().node_type(), NodeType::File);
    }

    #[test]
    fn create_without_ticket_fails() {
        let mut s = init_state();
        let lt = LockTable::new();
        let result = DbOperation::CreateNode {
            nlock: NodeLock::shared(NodeId::new(2)),
            orig_path: "/x".to_string(),
            node_type: NodeType::File,
            parent_id: NodeId::ROOT,
            uid: 0,
            gid: 0,
            perm_mode: 0o644,
            modified_t: Timestamp::zero(),
        }
        .apply(&mut s, Some(&lt));
        assert!(matches!(result, Err(MetaError::LockRequired { .. })));
    }

    #[test]
    fn hardlink_duplicate_name_fails() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let id = create_file(&mut s, &mut lt, "f");

        let result = DbOperation::HardLink {
            nlock: NodeLock::shared(NodeId::ROOT),
            name: "f".to_string(),
            target_id: id,
        }
        .apply(&mut s, Some(&lt));
        assert!(matches!(result, Err(MetaError::AlreadyExists { .. })));
    }

    #[test]
    fn hardlink_missing_target_fails() {
        let mut s = init_state();
        let result = DbOperation::HardLink {
            nlock: NodeLock::shared(NodeId::ROOT),
            name: "ghost".to_string(),
            target_id: NodeId::new(99),
        }
        .apply(&mut s, None);
        assert!(matches!(result, Err(MetaError::NotFound { .. })));
    }

    #[test]
    fn remove_detaches_name() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let id = create_file(&mut s, &mut lt, "doomed");

        DbOperation::Remove {
            nlock: NodeLock::shared(NodeId::ROOT),
            name: "doomed".to_string(),
        }
        .apply(&mut s, Some(&lt))
        .unwrap();

        let root = s.nodes.get(&NodeId::ROOT).unwrap().as_dir().unwrap();
        assert!(!root.entries.contains_key("doomed"));
        // node itself survives, unreachable, until GC
        assert!(s.nodes.contains_key(&id));
    }

    #[test]
    fn remove_nonempty_dir_fails() {
        let mut s = init_state();
        let mut lt = LockTable::new();

        // /sub
        DbOperation::AllocateNodeId.apply(&mut s, None).unwrap();
        let dir_id = s.last_id;
        let nlock = lt.acquire(dir_id).unwrap();
        DbOperation::CreateNode {
            nlock,
            orig_path: "/sub".to_string(),
            node_type: NodeType::Dir,
            parent_id: NodeId::ROOT,
            uid: 0,
            gid: 0,
            perm_mode: 0o755,
            modified_t: Timestamp::zero(),
        }
        .apply(&mut s, Some(&lt))
        .unwrap();
        DbOperation::HardLink {
            nlock: NodeLock::shared(NodeId::ROOT),
            name: "sub".to_string(),
            target_id: dir_id,
        }
        .apply(&mut s, Some(&lt))
        .unwrap();
        lt.release(nlock).unwrap();

        // /sub/f
        DbOperation::AllocateNodeId.apply(&mut s, None).unwrap();
        let f_id = s.last_id;
        let nlock = lt.acquire(f_id).unwrap();
        DbOperation::CreateNode {
            nlock,
            orig_path: "/sub/f".to_string(),
            node_type: NodeType::File,
            parent_id: dir_id,
            uid: 0,
            gid: 0,
            perm_mode: 0o644,
            modified_t: Timestamp::zero(),
        }
        .apply(&mut s, Some(&lt))
        .unwrap();
        DbOperation::HardLink {
            nlock: NodeLock::shared(dir_id),
            name: "f".to_string(),
            target_id: f_id,
        }
        .apply(&mut s, Some(&lt))
        .unwrap();
        lt.release(nlock).unwrap();

        let result = DbOperation::Remove {
            nlock: NodeLock::shared(NodeId::ROOT),
            name: "sub".to_string(),
        }
        .apply(&mut s, Some(&lt));
        assert!(matches!(result, Err(MetaError::NotEmpty { .. })));
    }

    #[test]
    fn rename_moves_name() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let id = create_file(&mut s, &mut lt, "old");

        DbOperation::Rename {
            src_dir_id: NodeId::ROOT,
            src_name: "old".to_string(),
            dst_dir_id: NodeId::ROOT,
            dst_name: "new".to_string(),
        }
        .apply(&mut s, Some(&lt))
        .unwrap();

        let root = s.nodes.get(&NodeId::ROOT).unwrap().as_dir().unwrap();
        assert!(!root.entries.contains_key("old"));
        assert_eq!(root.entries.get("new"), Some(&id));
    }

    #[test]
    fn rename_same_src_dst_is_noop() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let id = create_file(&mut s, &mut lt, "same");

        DbOperation::Rename {
            src_dir_id: NodeId::ROOT,
            src_name: "same".to_string(),
            dst_dir_id: NodeId::ROOT,
            dst_name: "same".to_string(),
        }
        .apply(&mut s, Some(&lt))
        .unwrap();

        let root = s.nodes.get(&NodeId::ROOT).unwrap().as_dir().unwrap();
        assert_eq!(root.entries.get("same"), Some(&id));
    }

    #[test]
    fn rename_updates_moved_dir_parent() {
        let mut s = init_state();
        let mut lt = LockTable::new();

        // /a, /b dirs
        let mk_dir = |s: &mut DbStateData, lt: &mut LockTable, name: &str| {
            DbOperation::AllocateNodeId.apply(s, None).unwrap();
            let id = s.last_id;
            let nlock = lt.acquire(id).unwrap();
            DbOperation::CreateNode {
                nlock,
                orig_path: format!("/{}", name),
                node_type: NodeType::Dir,
                parent_id: NodeId::ROOT,
                uid: 0,
                gid: 0,
                perm_mode: 0o755,
                modified_t: Timestamp::zero(),
            }
            .apply(s, Some(lt))
            .unwrap();
            DbOperation::HardLink {
                nlock: NodeLock::shared(NodeId::ROOT),
                name: name.to_string(),
                target_id: id,
            }
            .apply(s, Some(lt))
            .unwrap();
            lt.release(nlock).unwrap();
            id
        };
        let a = mk_dir(&mut s, &mut lt, "a");
        let b = mk_dir(&mut s, &mut lt, "b");

        DbOperation::Rename {
            src_dir_id: NodeId::ROOT,
            src_name: "b".to_string(),
            dst_dir_id: a,
            dst_name: "b".to_string(),
        }
        .apply(&mut s, Some(&lt))
        .unwrap();

        let moved = s.nodes.get(&b).unwrap().as_dir().unwrap();
        assert_eq!(moved.parent_id, a);
    }

    #[test]
    fn update_size_requires_ticket() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let id = create_file(&mut s, &mut lt, "f");

        let result = DbOperation::UpdateSize {
            nlock: NodeLock::shared(id),
            size: 10,
        }
        .apply(&mut s, Some(&lt));
        assert!(matches!(result, Err(MetaError::LockRequired { .. })));

        let nlock = lt.acquire(id).unwrap();
        DbOperation::UpdateSize { nlock, size: 10 }
            .apply(&mut s, Some(&lt))
            .unwrap();
        assert_eq!(s.nodes.get(&id).unwrap().as_file().unwrap().size, 10);
    }

    #[test]
    fn update_chunks_on_dir_fails() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let nlock = lt.acquire(NodeId::ROOT).unwrap();

        let result = DbOperation::UpdateChunks {
            nlock,
            chunks: Vec::new(),
        }
        .apply(&mut s, Some(&lt));
        assert!(matches!(result, Err(MetaError::NotFile { .. })));
    }

    #[test]
    fn attr_updates_apply_to_both_kinds() {
        let mut s = init_state();
        let mut lt = LockTable::new();
        let id = create_file(&mut s, &mut lt, "f");

        DbOperation::UpdateUid { id, uid: 7 }.apply(&mut s, None).unwrap();
        DbOperation::UpdateGid { id, gid: 8 }.apply(&mut s, None).unwrap();
        DbOperation::UpdatePermMode { id, perm_mode: 0o600 }
            .apply(&mut s, None)
            .unwrap();
        let t = Timestamp { secs: 99, nanos: 1 };
        DbOperation::UpdateModifiedT { id, modified_t: t }
            .apply(&mut s, None)
            .unwrap();

        let n = s.nodes.get(&id).unwrap();
        assert_eq!(n.uid(), 7);
        assert_eq!(n.gid(), 8);
        assert_eq!(n.perm_mode(), 0o600);
        assert_eq!(n.modified_t(), t);
    }

    #[test]
    fn ops_json_roundtrip() {
        let op = DbOperation::UpdateChunks {
            nlock: NodeLock {
                id: NodeId::new(4),
                ticket: crate::types::Ticket(2),
            },
            chunks: vec![FileChunk {
                offset: 0,
                length: 16,
                blob_path: "abcd".to_string(),
            }],
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("\"kind\":\"update_chunks\""));
        let back: DbOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn replay_skips_lock_checks() {
        let mut s = init_state();
        // op carries a ticket that no live lock table backs; replay accepts it
        let op = DbOperation::CreateNode {
            nlock: NodeLock {
                id: NodeId::new(2),
                ticket: crate::types::Ticket(77),
            },
            orig_path: "/replayed".to_string(),
            node_type: NodeType::File,
            parent_id: NodeId::ROOT,
            uid: 0,
            gid: 0,
            perm_mode: 0o644,
            modified_t: Timestamp::zero(),
        };
        op.apply(&mut s, None).unwrap();
        assert!(s.nodes.contains_key(&NodeId::new(2)));
    }
}
