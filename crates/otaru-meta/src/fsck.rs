//! Reachability walk over the inode DB.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::error::MetaError;
use crate::node::Node;
use crate::state::DbStateData;
use crate::types::NodeId;

/// Walks every node reachable from the root, collecting the blobpaths of
/// all live file chunks.
///
/// Returned errors flag inconsistencies found on the way: dangling
/// directory entries and malformed chunk indexes. Unreachable nodes are
/// not errors — a removed name leaves its node behind on purpose, to be
/// reclaimed by the garbage collector.
pub fn fsck(state: &DbStateData) -> (Vec<String>, Vec<MetaError>) {
    let mut blobpaths = Vec::new();
    let mut errors = Vec::new();

    if !state.nodes.contains_key(&NodeId::ROOT) {
        errors.push(MetaError::NotFound { id: NodeId::ROOT });
        return (blobpaths, errors);
    }

    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = VecDeque::new();
    queue.push_back(NodeId::ROOT);

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }

        match state.nodes.get(&id) {
            None => {
                // a directory entry pointed here but the node is gone
                errors.push(MetaError::NotFound { id });
            }
            Some(Node::File(fnode)) => {
                let mut prev_right = 0u64;
                for (i, c) in fnode.chunks.iter().enumerate() {
                    if i > 0 && c.left() < prev_right {
                        errors.push(MetaError::Internal {
                            msg: format!("node {}: chunk index not disjoint at #{}", id, i),
                        });
                    }
                    prev_right = c.right();
                    blobpaths.push(c.blob_path.clone());
                }
            }
            Some(Node::Dir(dnode)) => {
                queue.extend(dnode.entries.values().copied());
            }
        }
    }

    debug!(
        live = blobpaths.len(),
        errors = errors.len(),
        visited = visited.len(),
        "fsck walk done"
    );
    (blobpaths, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{DirNode, FileNode};
    use crate::ops::DbOperation;
    use crate::types::Timestamp;
    use otaru_chunk::FileChunk;
    use std::collections::BTreeMap;

    fn init_state() -> DbStateData {
        let mut s = DbStateData::new();
        DbOperation::InitializeFs.apply(&mut s, None).unwrap();
        s
    }

    fn chunk(offset: u64, length: u64, path: &str) -> FileChunk {
        FileChunk {
            offset,
            length,
            blob_path: path.to_string(),
        }
    }

    fn add_file(s: &mut DbStateData, id: u64, name: &str, chunks: Vec<FileChunk>) {
        let nid = NodeId::new(id);
        s.add_new_node(Node::File(FileNode {
            id: nid,
            orig_path: format!("/{}", name),
            uid: 0,
            gid: 0,
            perm_mode: 0o644,
            modified_t: Timestamp::zero(),
            size: chunks.last().map(|c| c.right()).unwrap_or(0),
            chunks,
        }))
        .unwrap();
        if let Some(Node::Dir(root)) = s.nodes.get_mut(&NodeId::ROOT) {
            root.entries.insert(name.to_string(), nid);
        }
    }

    #[test]
    fn empty_fs_has_no_blobs_no_errors() {
        let s = init_state();
        let (blobs, errors) = fsck(&s);
        assert!(blobs.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn collects_chunk_blobpaths() {
        let mut s = init_state();
        add_file(&mut s, 2, "a", vec![chunk(0, 10, "x"), chunk(10, 10, "y")]);
        add_file(&mut s, 3, "b", vec![chunk(0, 5, "z")]);

        let (mut blobs, errors) = fsck(&s);
        blobs.sort();
        assert_eq!(blobs, vec!["x", "y", "z"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn unreachable_node_is_not_an_error_and_not_live() {
        let mut s = init_state();
        add_file(&mut s, 2, "kept", vec![chunk(0, 10, "live")]);
        // orphan node: exists in the map, no directory entry
        s.add_new_node(Node::File(FileNode {
            id: NodeId::new(9),
            orig_path: "/orphan".to_string(),
            uid: 0,
            gid: 0,
            perm_mode: 0o644,
            modified_t: Timestamp::zero(),
            size: 10,
            chunks: vec![chunk(0, 10, "dead")],
        }))
        .unwrap();

        let (blobs, errors) = fsck(&s);
        assert_eq!(blobs, vec!["live"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn dangling_entry_is_an_error() {
        let mut s = init_state();
        if let Some(Node::Dir(root)) = s.nodes.get_mut(&NodeId::ROOT) {
            root.entries.insert("ghost".to_string(), NodeId::new(404));
        }

        let (blobs, errors) = fsck(&s);
        assert!(blobs.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], MetaError::NotFound { .. }));
    }

    #[test]
    fn overlapping_chunks_flagged() {
        let mut s = init_state();
        add_file(&mut s, 2, "bad", vec![chunk(0, 10, "x"), chunk(5, 10, "y")]);

        let (blobs, errors) = fsck(&s);
        // paths are still collected so GC never deletes referenced blobs
        assert_eq!(blobs.len(), 2);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn cyclic_entries_terminate() {
        let mut s = init_state();
        let sub = NodeId::new(2);
        s.add_new_node(Node::Dir(DirNode {
            id: sub,
            orig_path: "/sub".to_string(),
            uid: 0,
            gid: 0,
            perm_mode: 0o755,
            modified_t: Timestamp::zero(),
            parent_id: NodeId::ROOT,
            entries: BTreeMap::from([("loop".to_string(), NodeId::ROOT)]),
        }))
        .unwrap();
        if let Some(Node::Dir(root)) = s.nodes.get_mut(&NodeId::ROOT) {
            root.entries.insert("sub".to_string(), sub);
        }

        let (blobs, errors) = fsck(&s);
        assert!(blobs.is_empty());
        assert!(errors.is_empty());
    }
}
