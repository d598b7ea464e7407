//! Blob store traits: random access handles, listing, removal.

use crate::error::BlobResult;
use crate::flags::OpenFlags;

/// Random-access view of a single blob.
///
/// Handles are thread-safe; offsets are absolute within the blob.
pub trait BlobHandle: Send + Sync {
    /// Reads at `offset`, returning the number of bytes read.
    /// A short count (including 0) means end of blob.
    fn pread(&self, offset: u64, buf: &mut [u8]) -> BlobResult<usize>;

    /// Writes `buf` at `offset`, extending the blob as needed.
    fn pwrite(&self, offset: u64, buf: &[u8]) -> BlobResult<()>;

    /// Current blob size in bytes.
    fn size(&self) -> BlobResult<u64>;

    /// Truncates the blob to `size` bytes.
    fn truncate(&self, size: u64) -> BlobResult<()>;
}

impl dyn BlobHandle {
    /// Reads exactly `buf.len()` bytes at `offset`, zero-filling past the
    /// end of the blob. Returns the count of real (non-filled) bytes.
    pub fn pread_zero_fill(&self, offset: u64, buf: &mut [u8]) -> BlobResult<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.pread(offset + filled as u64, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        for b in &mut buf[filled..] {
            *b = 0;
        }
        Ok(filled)
    }
}

/// A store of blobs addressed by blobpath strings.
pub trait BlobStore: Send + Sync {
    /// Opens (or creates, per `flags`) the blob at `blobpath`.
    fn open(&self, blobpath: &str, flags: OpenFlags) -> BlobResult<Box<dyn BlobHandle>>;

    /// The access the store itself permits; handle flags are masked by this.
    fn flags(&self) -> OpenFlags;
}

/// Enumerates every blobpath in the store. Used by the garbage collector.
pub trait BlobLister: Send + Sync {
    /// Returns all blobpaths currently present.
    fn list_blobs(&self) -> BlobResult<Vec<String>>;
}

/// Removes blobs by path. Used by the garbage collector.
pub trait BlobRemover: Send + Sync {
    /// Removes the blob at `blobpath`. Removing a missing blob is an error.
    fn remove_blob(&self, blobpath: &str) -> BlobResult<()>;
}

/// Full-featured store: random access plus listing and removal.
pub trait RandomAccessStore: BlobStore + BlobLister + BlobRemover {}

impl<T: BlobStore + BlobLister + BlobRemover> RandomAccessStore for T {}
