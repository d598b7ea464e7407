//! In-memory blob store, primarily for tests and small scratch volumes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::flags::OpenFlags;
use crate::store::{BlobHandle, BlobLister, BlobRemover, BlobStore};

type BlobCell = Arc<RwLock<Vec<u8>>>;

/// Blob store keeping every blob as a byte vector in a process-local map.
pub struct MemBlobStore {
    blobs: RwLock<HashMap<String, BlobCell>>,
    flags: OpenFlags,
}

impl MemBlobStore {
    /// Creates an empty read-write store.
    pub fn new() -> Self {
        Self::with_flags(OpenFlags::RDWR.union(OpenFlags::CREATE))
    }

    /// Creates an empty store with an explicit permission mask.
    pub fn with_flags(flags: OpenFlags) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            flags,
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    /// True if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    /// Test helper: installs a blob with the given content.
    pub fn put(&self, blobpath: &str, content: Vec<u8>) {
        self.blobs
            .write()
            .insert(blobpath.to_string(), Arc::new(RwLock::new(content)));
    }
}

impl Default for MemBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

struct MemBlobHandle {
    cell: BlobCell,
    flags: OpenFlags,
}

impl BlobHandle for MemBlobHandle {
    fn pread(&self, offset: u64, buf: &mut [u8]) -> BlobResult<usize> {
        if !self.flags.is_read_allowed() {
            return Err(BlobError::PermissionDenied { op: "pread" });
        }
        let data = self.cell.read();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn pwrite(&self, offset: u64, buf: &[u8]) -> BlobResult<()> {
        if !self.flags.is_write_allowed() {
            return Err(BlobError::PermissionDenied { op: "pwrite" });
        }
        if buf.is_empty() {
            return Ok(());
        }
        let mut data = self.cell.write();
        let end = offset as usize + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    fn size(&self) -> BlobResult<u64> {
        Ok(self.cell.read().len() as u64)
    }

    fn truncate(&self, size: u64) -> BlobResult<()> {
        if !self.flags.is_write_allowed() {
            return Err(BlobError::PermissionDenied { op: "truncate" });
        }
        let mut data = self.cell.write();
        data.truncate(size as usize);
        Ok(())
    }
}

impl BlobStore for MemBlobStore {
    fn open(&self, blobpath: &str, flags: OpenFlags) -> BlobResult<Box<dyn BlobHandle>> {
        let effective = flags.mask(self.flags);
        if flags.is_write_allowed() && !effective.is_write_allowed() {
            return Err(BlobError::PermissionDenied { op: "open" });
        }

        let mut blobs = self.blobs.write();
        let existing = blobs.get(blobpath).cloned();

        let cell = match existing {
            Some(cell) => {
                if flags.is_excl() {
                    return Err(BlobError::AlreadyExists {
                        blobpath: blobpath.to_string(),
                    });
                }
                cell
            }
            None => {
                if !flags.is_create() {
                    return Err(BlobError::NotFound {
                        blobpath: blobpath.to_string(),
                    });
                }
                debug!(blobpath, "creating blob");
                let cell: BlobCell = Arc::new(RwLock::new(Vec::new()));
                blobs.insert(blobpath.to_string(), cell.clone());
                cell
            }
        };
        drop(blobs);

        if flags.is_write_truncate() {
            cell.write().clear();
        }

        Ok(Box::new(MemBlobHandle {
            cell,
            flags: effective,
        }))
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }
}

impl BlobLister for MemBlobStore {
    fn list_blobs(&self) -> BlobResult<Vec<String>> {
        Ok(self.blobs.read().keys().cloned().collect())
    }
}

impl BlobRemover for MemBlobStore {
    fn remove_blob(&self, blobpath: &str) -> BlobResult<()> {
        match self.blobs.write().remove(blobpath) {
            Some(_) => Ok(()),
            None => Err(BlobError::NotFound {
                blobpath: blobpath.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rdwr_create() -> OpenFlags {
        OpenFlags::RDWR.union(OpenFlags::CREATE)
    }

    #[test]
    fn create_write_read_roundtrip() {
        let store = MemBlobStore::new();
        let h = store.open("blob1", rdwr_create()).unwrap();
        h.pwrite(0, b"hello").unwrap();

        let mut buf = [0u8; 5];
        let n = h.pread(0, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn open_missing_without_create_fails() {
        let store = MemBlobStore::new();
        assert!(matches!(
            store.open("missing", OpenFlags::RDONLY),
            Err(BlobError::NotFound { .. })
        ));
    }

    #[test]
    fn excl_create_rejects_existing() {
        let store = MemBlobStore::new();
        store.put("blob1", vec![1, 2, 3]);
        let flags = rdwr_create().union(OpenFlags::EXCL);
        assert!(matches!(
            store.open("blob1", flags),
            Err(BlobError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn pwrite_extends_with_zero_gap() {
        let store = MemBlobStore::new();
        let h = store.open("blob1", rdwr_create()).unwrap();
        h.pwrite(4, b"xy").unwrap();
        assert_eq!(h.size().unwrap(), 6);

        let mut buf = [0xffu8; 6];
        h.pread(0, &mut buf).unwrap();
        assert_eq!(&buf, &[0, 0, 0, 0, b'x', b'y']);
    }

    #[test]
    fn pread_past_eof_is_short() {
        let store = MemBlobStore::new();
        store.put("blob1", b"abc".to_vec());
        let h = store.open("blob1", OpenFlags::RDONLY).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(h.pread(1, &mut buf).unwrap(), 2);
        assert_eq!(h.pread(3, &mut buf).unwrap(), 0);
    }

    #[test]
    fn truncate_shortens() {
        let store = MemBlobStore::new();
        store.put("blob1", b"abcdef".to_vec());
        let h = store.open("blob1", rdwr_create()).unwrap();
        h.truncate(2).unwrap();
        assert_eq!(h.size().unwrap(), 2);
    }

    #[test]
    fn truncate_on_open() {
        let store = MemBlobStore::new();
        store.put("blob1", b"abcdef".to_vec());
        let h = store
            .open("blob1", rdwr_create().union(OpenFlags::TRUNCATE))
            .unwrap();
        assert_eq!(h.size().unwrap(), 0);
    }

    #[test]
    fn readonly_store_rejects_write_open() {
        let store = MemBlobStore::with_flags(OpenFlags::RDONLY);
        assert!(matches!(
            store.open("blob1", rdwr_create()),
            Err(BlobError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn readonly_handle_rejects_write() {
        let store = MemBlobStore::new();
        store.put("blob1", b"abc".to_vec());
        let h = store.open("blob1", OpenFlags::RDONLY).unwrap();
        assert!(matches!(
            h.pwrite(0, b"x"),
            Err(BlobError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn list_and_remove() {
        let store = MemBlobStore::new();
        store.put("a", vec![]);
        store.put("b", vec![]);

        let mut listed = store.list_blobs().unwrap();
        listed.sort();
        assert_eq!(listed, vec!["a".to_string(), "b".to_string()]);

        store.remove_blob("a").unwrap();
        assert_eq!(store.len(), 1);
        assert!(matches!(
            store.remove_blob("a"),
            Err(BlobError::NotFound { .. })
        ));
    }

    #[test]
    fn zero_fill_helper_pads_tail() {
        let store = MemBlobStore::new();
        store.put("blob1", b"abc".to_vec());
        let h = store.open("blob1", OpenFlags::RDONLY).unwrap();

        let mut buf = [0xffu8; 6];
        let real = (&*h).pread_zero_fill(0, &mut buf).unwrap();
        assert_eq!(real, 3);
        assert_eq!(&buf, &[b'a', b'b', b'c', 0, 0, 0]);
    }
}
