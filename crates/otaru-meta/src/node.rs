//! Inode node records.

use std::collections::BTreeMap;

use otaru_chunk::FileChunk;
use serde::{Deserialize, Serialize};

use crate::types::{NodeId, NodeType, Timestamp};

/// A regular file node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    /// Node ID.
    pub id: NodeId,
    /// Path passed at first create. Does not follow renames; recovery and
    /// debug use only.
    pub orig_path: String,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Permission bits.
    pub perm_mode: u16,
    /// Last modification time.
    pub modified_t: Timestamp,
    /// Logical file length. May exceed the chunk coverage when the tail is
    /// a hole.
    pub size: u64,
    /// Chunk index: strictly increasing, disjoint ranges.
    pub chunks: Vec<FileChunk>,
}

/// A directory node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirNode {
    /// Node ID.
    pub id: NodeId,
    /// Path passed at first create; debug use only.
    pub orig_path: String,
    /// Owner user ID.
    pub uid: u32,
    /// Owner group ID.
    pub gid: u32,
    /// Permission bits.
    pub perm_mode: u16,
    /// Last modification time.
    pub modified_t: Timestamp,
    /// Parent directory ID; the root points at itself.
    pub parent_id: NodeId,
    /// Name → child node ID.
    pub entries: BTreeMap<String, NodeId>,
}

/// An inode node: file or directory.
///
/// Queries return cloned snapshots of these records; mutation happens only
/// through transactions. Externally tagged so both the bincode snapshot
/// and JSON debugging output round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    /// Regular file.
    File(FileNode),
    /// Directory.
    Dir(DirNode),
}

impl Node {
    /// Node ID.
    pub fn id(&self) -> NodeId {
        match self {
            Node::File(fnode) => fnode.id,
            Node::Dir(dnode) => dnode.id,
        }
    }

    /// Node kind.
    pub fn node_type(&self) -> NodeType {
        match self {
            Node::File(_) => NodeType::File,
            Node::Dir(_) => NodeType::Dir,
        }
    }

    /// Original creation path.
    pub fn orig_path(&self) -> &str {
        match self {
            Node::File(fnode) => &fnode.orig_path,
            Node::Dir(dnode) => &dnode.orig_path,
        }
    }

    /// Owner user ID.
    pub fn uid(&self) -> u32 {
        match self {
            Node::File(fnode) => fnode.uid,
            Node::Dir(dnode) => dnode.uid,
        }
    }

    /// Owner group ID.
    pub fn gid(&self) -> u32 {
        match self {
            Node::File(fnode) => fnode.gid,
            Node::Dir(dnode) => dnode.gid,
        }
    }

    /// Permission bits.
    pub fn perm_mode(&self) -> u16 {
        match self {
            Node::File(fnode) => fnode.perm_mode,
            Node::Dir(dnode) => dnode.perm_mode,
        }
    }

    /// Last modification time.
    pub fn modified_t(&self) -> Timestamp {
        match self {
            Node::File(fnode) => fnode.modified_t,
            Node::Dir(dnode) => dnode.modified_t,
        }
    }

    /// File view, if this is a file.
    pub fn as_file(&self) -> Option<&FileNode> {
        match self {
            Node::File(fnode) => Some(fnode),
            Node::Dir(_) => None,
        }
    }

    /// Directory view, if this is a directory.
    pub fn as_dir(&self) -> Option<&DirNode> {
        match self {
            Node::Dir(dnode) => Some(dnode),
            Node::File(_) => None,
        }
    }
}
