//! Chunked file I/O: serves a file's byte address space from a sorted,
//! disjoint list of encrypted chunk blobs.
//!
//! Chunk content is immutable: every rewrite re-encrypts the chunk to a
//! freshly generated blobpath and commits the updated index afterwards,
//! so the old blob stays readable until the index references the new one.
//! Stale blobs are reclaimed by the garbage collector.

use std::sync::Arc;

use otaru_blob::{gen_blob_path, BlobStore, OpenFlags};
use otaru_crypt::Cipher;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ChunkError, ChunkResult};
use crate::index::FileChunk;
use crate::io::{ChunkIo, ChunkReader};
use crate::writer::ChunkWriter;

/// Upper bound on a single chunk's plaintext payload.
pub const CHUNK_SPLIT_SIZE: u64 = 256 * 1024 * 1024;

/// Access to a file's persisted chunk index.
///
/// The filesystem layer implements this against the inode DB
/// (`UpdateChunks` under the file's exclusive lock).
pub trait ChunksArrayIo: Send + Sync {
    /// Reads the current chunk index.
    fn read(&self) -> ChunkResult<Vec<FileChunk>>;

    /// Persists a new chunk index.
    fn write(&self, chunks: &[FileChunk]) -> ChunkResult<()>;
}

/// In-memory chunk index, for tests and scratch files.
pub struct MemChunksArrayIo {
    chunks: RwLock<Vec<FileChunk>>,
}

impl MemChunksArrayIo {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
        }
    }
}

impl Default for MemChunksArrayIo {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunksArrayIo for MemChunksArrayIo {
    fn read(&self) -> ChunkResult<Vec<FileChunk>> {
        Ok(self.chunks.read().clone())
    }

    fn write(&self, chunks: &[FileChunk]) -> ChunkResult<()> {
        *self.chunks.write() = chunks.to_vec();
        Ok(())
    }
}

/// Random-access file I/O over chunk blobs.
pub struct ChunkedFileIo {
    bs: Arc<dyn BlobStore>,
    cipher: Cipher,
    caio: Arc<dyn ChunksArrayIo>,
    orig_filename: RwLock<String>,
    split_size: u64,
}

impl ChunkedFileIo {
    /// Creates chunked I/O with the standard split size.
    pub fn new(bs: Arc<dyn BlobStore>, cipher: &Cipher, caio: Arc<dyn ChunksArrayIo>) -> Self {
        Self::with_split_size(bs, cipher, caio, CHUNK_SPLIT_SIZE)
    }

    /// Creates chunked I/O with a custom split size (tests only shrink it).
    pub fn with_split_size(
        bs: Arc<dyn BlobStore>,
        cipher: &Cipher,
        caio: Arc<dyn ChunksArrayIo>,
        split_size: u64,
    ) -> Self {
        assert!(split_size > 0, "split size must be positive");
        Self {
            bs,
            cipher: cipher.clone(),
            caio,
            orig_filename: RwLock::new("<unknown>".to_string()),
            split_size,
        }
    }

    /// Records the origin filename stamped into new chunk prologues.
    pub fn set_orig_filename(&self, name: &str) {
        *self.orig_filename.write() = name.to_string();
    }

    fn new_file_chunk(&self, offset: u64) -> ChunkResult<FileChunk> {
        let blob_path = gen_blob_path(&*self.bs)?;
        debug!(offset, blob_path = %blob_path, "new chunk");
        Ok(FileChunk {
            offset,
            length: 0,
            blob_path,
        })
    }

    fn read_chunk_plaintext(&self, blob_path: &str) -> ChunkResult<Vec<u8>> {
        let bh = self.bs.open(blob_path, OpenFlags::RDONLY)?;
        let mut reader = ChunkReader::new(&*bh, &self.cipher)?;
        reader.read_all()
    }

    fn write_chunk_blob(&self, blob_path: &str, origin_offset: u64, plain: &[u8]) -> ChunkResult<()> {
        let flags = OpenFlags::RDWR.union(OpenFlags::CREATE).union(OpenFlags::EXCL);
        let bh = self.bs.open(blob_path, flags)?;
        let name = self.orig_filename.read().clone();
        let mut w = ChunkWriter::new(&*bh, &self.cipher, origin_offset, &name, plain.len() as u64)?;
        w.write(plain)?;
        w.finish()
    }

    /// Writes the slice of `remp` that falls inside `[c.offset, c.offset +
    /// max_chunk_len)`, re-encrypting the chunk to a fresh blob. Updates
    /// `c` in place and returns the number of input bytes consumed.
    fn write_to_chunk(
        &self,
        c: &mut FileChunk,
        is_new_chunk: bool,
        max_chunk_len: u64,
        remo: u64,
        remp: &[u8],
    ) -> ChunkResult<usize> {
        if !self.bs.flags().is_read_write_allowed() {
            return Err(ChunkError::PermissionDenied);
        }

        let coff = remo - c.offset;
        if coff >= max_chunk_len {
            return Ok(0);
        }
        let n = (remp.len() as u64).min(max_chunk_len - coff) as usize;
        if n == 0 {
            return Ok(0);
        }

        let old = if is_new_chunk {
            Vec::new()
        } else {
            self.read_chunk_plaintext(&c.blob_path)?
        };
        let new_len = old.len().max(coff as usize + n);
        let mut plain = vec![0u8; new_len];
        plain[..old.len()].copy_from_slice(&old);
        plain[coff as usize..coff as usize + n].copy_from_slice(&remp[..n]);

        // write blob first, only then let the caller commit the index
        let target = if is_new_chunk {
            c.blob_path.clone()
        } else {
            gen_blob_path(&*self.bs)?
        };
        self.write_chunk_blob(&target, c.offset, &plain)?;
        if !is_new_chunk {
            debug!(old = %c.blob_path, new = %target, "chunk rewritten to fresh blob");
        }
        c.blob_path = target;
        c.length = plain.len() as u64;
        Ok(n)
    }

    /// Writes `p` at `offset`, splitting into chunks bounded by the split
    /// size. Updates the chunk index after every chunk blob lands.
    pub fn pwrite(&self, offset: u64, p: &[u8]) -> ChunkResult<()> {
        if p.is_empty() {
            return Ok(());
        }

        let mut cs = self.caio.read()?;
        let mut remo = offset;
        let mut remp = p;

        let mut i = 0;
        while i < cs.len() && !remp.is_empty() {
            if cs[i].left() > remo {
                // Hole before cs[i]: insert a new chunk, aligned to the
                // split size but never overlapping its neighbors.
                let mut newo = remo / self.split_size * self.split_size;
                let mut maxlen = self.split_size;
                if i > 0 {
                    let pright = cs[i - 1].right();
                    if newo < pright {
                        maxlen -= pright - newo;
                        newo = pright;
                    }
                }
                maxlen = maxlen.min(cs[i].left() - newo);

                let mut newc = self.new_file_chunk(newo)?;
                let n = self.write_to_chunk(&mut newc, true, maxlen, remo, remp)?;
                if n == 0 {
                    return Err(ChunkError::Internal {
                        msg: "inserted chunk made no progress".to_string(),
                    });
                }
                cs.insert(i, newc);
                self.caio.write(&cs)?;
                remo += n as u64;
                remp = &remp[n..];
                i += 1;
                continue;
            }

            // Overlap or in-bounds extension of cs[i].
            let mut maxlen = self.split_size;
            if i + 1 < cs.len() {
                maxlen = maxlen.min(cs[i + 1].left() - cs[i].left());
            }
            let n = self.write_to_chunk(&mut cs[i], false, maxlen, remo, remp)?;
            if n > 0 {
                self.caio.write(&cs)?;
                remo += n as u64;
                remp = &remp[n..];
            }
            i += 1;
        }

        while !remp.is_empty() {
            // Append new chunks at the tail.
            let mut newo = remo / self.split_size * self.split_size;
            let mut maxlen = self.split_size;
            if let Some(last) = cs.last() {
                let lr = last.right();
                if newo < lr {
                    maxlen -= lr - newo;
                    newo = lr;
                }
            }

            let mut newc = self.new_file_chunk(newo)?;
            let n = self.write_to_chunk(&mut newc, true, maxlen, remo, remp)?;
            if n == 0 {
                return Err(ChunkError::Internal {
                    msg: "appended chunk made no progress".to_string(),
                });
            }
            cs.push(newc);
            self.caio.write(&cs)?;
            remo += n as u64;
            remp = &remp[n..];
        }

        Ok(())
    }

    /// Reads at `offset`; gaps between chunks read as zero. Returns the
    /// byte count covered by the chunk list — a short count means the read
    /// ran past the last chunk.
    pub fn read_at(&self, p: &mut [u8], offset: u64) -> ChunkResult<usize> {
        if !self.bs.flags().is_read_allowed() {
            return Err(ChunkError::PermissionDenied);
        }

        let cs = self.caio.read()?;
        let end = offset + p.len() as u64;
        let mut filled = 0usize;

        for c in &cs {
            if filled == p.len() {
                break;
            }
            let remo = offset + filled as u64;
            if c.left() >= end {
                break;
            }
            if c.right() <= remo {
                continue;
            }

            let remo = if c.left() > remo {
                // zero-fill the gap before this chunk
                let gap = ((c.left() - remo) as usize).min(p.len() - filled);
                p[filled..filled + gap].fill(0);
                filled += gap;
                if filled == p.len() {
                    break;
                }
                offset + filled as u64
            } else {
                remo
            };

            let coff = remo - c.left();
            let n = ((c.length - coff) as usize).min(p.len() - filled);
            let bh = self.bs.open(&c.blob_path, OpenFlags::RDONLY)?;
            let mut cio = ChunkIo::new(&*bh, &self.cipher);
            cio.pread(coff, &mut p[filled..filled + n])?;
            filled += n;
        }

        Ok(filled)
    }

    /// Byte length covered by the chunk list (not the logical file size,
    /// which may extend past it as a tail hole).
    pub fn size(&self) -> ChunkResult<u64> {
        let cs = self.caio.read()?;
        Ok(cs.last().map(|c| c.right()).unwrap_or(0))
    }

    /// Shrinks the chunk list to `size`: drops chunks fully past it and
    /// re-encrypts the remaining prefix of a straddling chunk to a fresh
    /// blob. Growing is a no-op here; the new tail is an implicit hole.
    pub fn truncate(&self, size: u64) -> ChunkResult<()> {
        if !self.bs.flags().is_read_write_allowed() {
            return Err(ChunkError::PermissionDenied);
        }

        let mut cs = self.caio.read()?;
        for i in (0..cs.len()).rev() {
            if cs[i].left() >= size {
                continue;
            }

            if cs[i].right() > size {
                let keep = size - cs[i].left();
                let mut plain = self.read_chunk_plaintext(&cs[i].blob_path)?;
                plain.truncate(keep as usize);

                let new_path = gen_blob_path(&*self.bs)?;
                self.write_chunk_blob(&new_path, cs[i].offset, &plain)?;
                debug!(old = %cs[i].blob_path, new = %new_path, keep, "chunk trimmed");
                cs[i].blob_path = new_path;
                cs[i].length = keep;
            }

            cs.truncate(i + 1);
            return self.caio.write(&cs);
        }

        self.caio.write(&[])
    }

    /// Flushes pending state. Chunk blobs are finalized as they are
    /// written, so this is a no-op kept for the handle lifecycle.
    pub fn close(&self) -> ChunkResult<()> {
        Ok(())
    }
}
