//! Bridge between the chunk layer and the inode DB: a file's chunk index
//! read through `query_node` and written through an `UpdateChunks`
//! transaction under the file's lock.

use std::sync::Arc;

use otaru_chunk::{ChunkError, ChunkResult, ChunksArrayIo, FileChunk};
use otaru_meta::{DbHandler, DbOperation, DbTransaction, MetaError, NodeLock};

/// Chunk index access bound to one node lock.
///
/// Reads work with any lock; writes require the lock to carry a live
/// exclusive ticket, which the DB enforces on the `UpdateChunks` op.
pub struct InodeDbChunksArrayIo {
    idb: Arc<dyn DbHandler>,
    nlock: NodeLock,
}

impl InodeDbChunksArrayIo {
    /// Binds chunk index access to `nlock`.
    pub fn new(idb: Arc<dyn DbHandler>, nlock: NodeLock) -> Self {
        Self { idb, nlock }
    }
}

fn meta_to_chunk(e: MetaError) -> ChunkError {
    ChunkError::Internal { msg: e.to_string() }
}

impl ChunksArrayIo for InodeDbChunksArrayIo {
    fn read(&self) -> ChunkResult<Vec<FileChunk>> {
        let (node, _) = self
            .idb
            .query_node(self.nlock.id, false)
            .map_err(meta_to_chunk)?;
        match node.as_file() {
            Some(fnode) => Ok(fnode.chunks.clone()),
            None => Err(ChunkError::Internal {
                msg: format!("node {} is not a file", self.nlock.id),
            }),
        }
    }

    fn write(&self, chunks: &[FileChunk]) -> ChunkResult<()> {
        self.idb
            .apply_transaction(DbTransaction::new(vec![DbOperation::UpdateChunks {
                nlock: self.nlock,
                chunks: chunks.to_vec(),
            }]))
            .map_err(meta_to_chunk)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otaru_meta::{
        InodeDb, MemSnapshotIo, MemTxLogIo, NodeId, NodeType, Timestamp, ALLOCATE_NEW_NODE_ID,
    };

    fn setup() -> (Arc<InodeDb>, NodeId) {
        let db = Arc::new(
            InodeDb::new_empty(Arc::new(MemSnapshotIo::new()), Arc::new(MemTxLogIo::new()))
                .unwrap(),
        );
        let nlock = db.lock_node(ALLOCATE_NEW_NODE_ID).unwrap();
        let id = nlock.id;
        db.apply_transaction(DbTransaction::new(vec![
            DbOperation::CreateNode {
                nlock,
                orig_path: "/f".to_string(),
                node_type: NodeType::File,
                parent_id: NodeId::ROOT,
                uid: 0,
                gid: 0,
                perm_mode: 0o644,
                modified_t: Timestamp::zero(),
            },
            DbOperation::HardLink {
                nlock: NodeLock::shared(NodeId::ROOT),
                name: "f".to_string(),
                target_id: id,
            },
        ]))
        .unwrap();
        db.unlock_node(nlock).unwrap();
        (db, id)
    }

    fn chunk(offset: u64, length: u64, path: &str) -> FileChunk {
        FileChunk {
            offset,
            length,
            blob_path: path.to_string(),
        }
    }

    #[test]
    fn read_empty_index() {
        let (db, id) = setup();
        let caio = InodeDbChunksArrayIo::new(db, NodeLock::shared(id));
        assert!(caio.read().unwrap().is_empty());
    }

    #[test]
    fn write_requires_ticket() {
        let (db, id) = setup();
        let caio = InodeDbChunksArrayIo::new(db.clone(), NodeLock::shared(id));
        assert!(caio.write(&[chunk(0, 4, "b")]).is_err());

        let (_, nlock) = db.query_node(id, true).unwrap();
        let caio = InodeDbChunksArrayIo::new(db.clone(), nlock);
        caio.write(&[chunk(0, 4, "b")]).unwrap();
        assert_eq!(caio.read().unwrap(), vec![chunk(0, 4, "b")]);
        db.unlock_node(nlock).unwrap();
    }

    #[test]
    fn read_on_dir_is_error() {
        let (db, _) = setup();
        let caio = InodeDbChunksArrayIo::new(db, NodeLock::shared(NodeId::ROOT));
        assert!(caio.read().is_err());
    }
}
