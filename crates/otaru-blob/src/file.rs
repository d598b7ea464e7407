//! One-file-per-blob store rooted at a base directory.

use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::flags::OpenFlags;
use crate::store::{BlobHandle, BlobLister, BlobRemover, BlobStore};

/// Blob store mapping each blobpath to a regular file under `base`.
pub struct FileBlobStore {
    base: PathBuf,
    flags: OpenFlags,
}

impl FileBlobStore {
    /// Opens (creating if needed) a store rooted at `base`.
    pub fn new(base: impl AsRef<Path>, flags: OpenFlags) -> BlobResult<Self> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base, flags })
    }

    fn blob_file_path(&self, blobpath: &str) -> BlobResult<PathBuf> {
        // blobpaths are flat names; anything that could escape the base
        // directory is rejected outright.
        if blobpath.is_empty()
            || blobpath.contains('/')
            || blobpath.contains('\\')
            || blobpath == "."
            || blobpath == ".."
        {
            return Err(BlobError::InvalidBlobPath {
                blobpath: blobpath.to_string(),
            });
        }
        Ok(self.base.join(blobpath))
    }
}

struct FileBlobHandle {
    file: fs::File,
    flags: OpenFlags,
}

impl BlobHandle for FileBlobHandle {
    fn pread(&self, offset: u64, buf: &mut [u8]) -> BlobResult<usize> {
        if !self.flags.is_read_allowed() {
            return Err(BlobError::PermissionDenied { op: "pread" });
        }
        Ok(self.file.read_at(buf, offset)?)
    }

    fn pwrite(&self, offset: u64, buf: &[u8]) -> BlobResult<()> {
        if !self.flags.is_write_allowed() {
            return Err(BlobError::PermissionDenied { op: "pwrite" });
        }
        let mut written = 0;
        while written < buf.len() {
            let n = self.file.write_at(&buf[written..], offset + written as u64)?;
            written += n;
        }
        Ok(())
    }

    fn size(&self) -> BlobResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn truncate(&self, size: u64) -> BlobResult<()> {
        if !self.flags.is_write_allowed() {
            return Err(BlobError::PermissionDenied { op: "truncate" });
        }
        self.file.set_len(size)?;
        Ok(())
    }
}

impl BlobStore for FileBlobStore {
    fn open(&self, blobpath: &str, flags: OpenFlags) -> BlobResult<Box<dyn BlobHandle>> {
        let effective = flags.mask(self.flags);
        if flags.is_write_allowed() && !effective.is_write_allowed() {
            return Err(BlobError::PermissionDenied { op: "open" });
        }

        let path = self.blob_file_path(blobpath)?;
        let mut opts = OpenOptions::new();
        opts.read(flags.is_read_allowed())
            .write(flags.is_write_allowed())
            .create(flags.is_create())
            .create_new(flags.is_excl())
            .truncate(flags.is_write_truncate());

        let file = opts.open(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BlobError::NotFound {
                blobpath: blobpath.to_string(),
            },
            std::io::ErrorKind::AlreadyExists => BlobError::AlreadyExists {
                blobpath: blobpath.to_string(),
            },
            _ => BlobError::Io(e),
        })?;

        debug!(blobpath, flags = %flags, "opened blob file");
        Ok(Box::new(FileBlobHandle {
            file,
            flags: effective,
        }))
    }

    fn flags(&self) -> OpenFlags {
        self.flags
    }
}

impl BlobLister for FileBlobStore {
    fn list_blobs(&self) -> BlobResult<Vec<String>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.base)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    paths.push(name.to_string());
                }
            }
        }
        Ok(paths)
    }
}

impl BlobRemover for FileBlobStore {
    fn remove_blob(&self, blobpath: &str) -> BlobResult<()> {
        let path = self.blob_file_path(blobpath)?;
        fs::remove_file(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BlobError::NotFound {
                blobpath: blobpath.to_string(),
            },
            _ => BlobError::Io(e),
        })
    }
}
