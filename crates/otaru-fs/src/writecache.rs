//! The per-file write cache: an ordered list of byte patches, merged on
//! write and spilled to the chunk layer on thresholds.

use tracing::debug;

use crate::error::FsResult;

/// One buffered write: a byte run at a file offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// File offset the run starts at.
    pub offset: u64,
    /// The buffered bytes.
    pub bytes: Vec<u8>,
}

impl Patch {
    /// The sentinel offset terminating every patch list.
    pub const SENTINEL_OFFSET: u64 = u64::MAX;

    fn sentinel() -> Patch {
        Patch {
            offset: Self::SENTINEL_OFFSET,
            bytes: Vec::new(),
        }
    }

    /// Inclusive left edge.
    pub fn left(&self) -> u64 {
        self.offset
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u64 {
        self.offset + self.bytes.len() as u64
    }

    /// True for the terminating sentinel.
    pub fn is_sentinel(&self) -> bool {
        self.offset == Self::SENTINEL_OFFSET
    }
}

/// Sorted, non-overlapping patches terminated by a sentinel with
/// `offset = u64::MAX`. The sentinel bounds every search from the right.
#[derive(Debug, Clone)]
pub struct Patches(Vec<Patch>);

impl Patches {
    /// Creates an empty list (sentinel only).
    pub fn new() -> Self {
        Patches(vec![Patch::sentinel()])
    }

    /// Iterates the real patches, excluding the sentinel.
    pub fn iter(&self) -> impl Iterator<Item = &Patch> {
        self.0.iter().filter(|p| !p.is_sentinel())
    }

    /// Number of real patches.
    pub fn len(&self) -> usize {
        self.0.len() - 1
    }

    /// True if no real patches are buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total buffered byte count.
    pub fn content_len(&self) -> u64 {
        self.iter().map(|p| p.bytes.len() as u64).sum()
    }

    /// Merges a new patch, trimming or replacing whatever it overlaps.
    pub fn merge(&mut self, newp: Patch) {
        if newp.bytes.is_empty() {
            return;
        }

        let ps = &mut self.0;

        // [lefti, rightx) is the run of existing patches newp touches;
        // the sentinel guarantees both scans terminate.
        let mut lefti = 0;
        while newp.left() > ps[lefti].right() {
            lefti += 1;
        }
        let mut rightx = lefti;
        while newp.right() > ps[rightx].left() {
            rightx += 1;
        }

        let mut newps: Vec<Patch> = Vec::with_capacity(3);

        if rightx > lefti {
            let l = &ps[lefti];
            if l.left() < newp.left() {
                // trim the left neighbor on the right
                let keep = (newp.left() - l.left()) as usize;
                newps.push(Patch {
                    offset: l.offset,
                    bytes: l.bytes[..keep].to_vec(),
                });
            }
        }

        let new_right = newp.right();
        newps.push(newp);

        if rightx > lefti {
            let r = &ps[rightx - 1];
            if r.right() > new_right {
                // trim the right neighbor on the left, shifting its offset
                let skip = (new_right - r.left()) as usize;
                newps.push(Patch {
                    offset: new_right,
                    bytes: r.bytes[skip..].to_vec(),
                });
            }
        }

        ps.splice(lefti..rightx, newps);
    }

    /// Drops patches fully right of `size` and clips a straddling patch.
    pub fn truncate(&mut self, size: u64) {
        let ps = &mut self.0;
        ps.pop(); // sentinel

        while let Some(last) = ps.last_mut() {
            if last.left() >= size {
                ps.pop();
                continue;
            }
            if last.right() > size {
                last.bytes.truncate((size - last.left()) as usize);
            }
            break;
        }

        ps.push(Patch::sentinel());
    }

    /// Empties the list back to sentinel-only.
    pub fn reset(&mut self) {
        self.0.clear();
        self.0.push(Patch::sentinel());
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        assert!(self.0.last().unwrap().is_sentinel(), "sentinel missing");
        for w in self.0.windows(2) {
            assert!(w[0].left() < w[1].left(), "offsets not increasing");
            assert!(w[0].right() <= w[1].left(), "patches overlap");
        }
    }
}

impl Default for Patches {
    fn default() -> Self {
        Self::new()
    }
}

/// Write cache thresholds. Process-wide tunables, not compile-time
/// constants; the defaults are the stable contract.
#[derive(Debug, Clone)]
pub struct WriteCacheConfig {
    /// Spill when the patch count exceeds this.
    pub max_patches: usize,
    /// Spill when the buffered byte total exceeds this.
    pub max_patch_content_len: u64,
}

impl Default for WriteCacheConfig {
    fn default() -> Self {
        Self {
            max_patches: 32,
            max_patch_content_len: 8 * 1024 * 1024,
        }
    }
}

/// Buffers writes as patches and serves read-through over a fallback
/// reader until the patches are spilled.
pub struct FileWriteCache {
    ps: Patches,
    config: WriteCacheConfig,
}

impl FileWriteCache {
    /// Creates a cache with default thresholds.
    pub fn new() -> Self {
        Self::with_config(WriteCacheConfig::default())
    }

    /// Creates a cache with explicit thresholds.
    pub fn with_config(config: WriteCacheConfig) -> Self {
        Self {
            ps: Patches::new(),
            config,
        }
    }

    /// Buffers one write.
    pub fn pwrite(&mut self, data: &[u8], offset: u64) {
        if data.is_empty() {
            return;
        }
        self.ps.merge(Patch {
            offset,
            bytes: data.to_vec(),
        });
    }

    /// Fills `dst` from the buffered patches, reading gaps through
    /// `fallback`. Short fallback reads are zero-filled, so `dst` is
    /// always fully written on success.
    pub fn read_through<F>(&self, dst: &mut [u8], offset: u64, mut fallback: F) -> FsResult<()>
    where
        F: FnMut(&mut [u8], u64) -> FsResult<usize>,
    {
        let mut pos = 0usize;

        for patch in self.ps.iter() {
            if pos == dst.len() {
                return Ok(());
            }
            let remo = offset + pos as u64;
            if remo >= patch.right() {
                continue;
            }

            let remo = if patch.left() > remo {
                // fallback for the gap before this patch
                let gap = ((patch.left() - remo) as usize).min(dst.len() - pos);
                let n = fallback(&mut dst[pos..pos + gap], remo)?;
                dst[pos + n..pos + gap].fill(0);
                pos += gap;
                if pos == dst.len() {
                    return Ok(());
                }
                offset + pos as u64
            } else {
                remo
            };

            let apply_off = (remo - patch.offset) as usize;
            let apply_len = (patch.bytes.len() - apply_off).min(dst.len() - pos);
            dst[pos..pos + apply_len]
                .copy_from_slice(&patch.bytes[apply_off..apply_off + apply_len]);
            pos += apply_len;
        }

        if pos < dst.len() {
            let remo = offset + pos as u64;
            let n = fallback(&mut dst[pos..], remo)?;
            dst[pos + n..].fill(0);
        }
        Ok(())
    }

    /// True when the cache has crossed a spill threshold.
    pub fn needs_sync(&self) -> bool {
        self.ps.len() > self.config.max_patches
            || self.ps.content_len() > self.config.max_patch_content_len
    }

    /// Spills the patches through `write`, coalescing adjacent patches
    /// into one contiguous write per run. On success the list resets; on
    /// failure it is left intact for retry.
    pub fn sync<F>(&mut self, mut write: F) -> FsResult<()>
    where
        F: FnMut(u64, &[u8]) -> FsResult<()>,
    {
        let mut run_offset = 0u64;
        let mut run: Vec<u8> = Vec::new();

        for patch in self.ps.iter() {
            if run.is_empty() {
                run_offset = patch.offset;
                run.extend_from_slice(&patch.bytes);
            } else if run_offset + run.len() as u64 == patch.offset {
                run.extend_from_slice(&patch.bytes);
            } else {
                write(run_offset, &run)?;
                run_offset = patch.offset;
                run.clear();
                run.extend_from_slice(&patch.bytes);
            }
        }
        if !run.is_empty() {
            write(run_offset, &run)?;
        }

        debug!(
            patches = self.ps.len(),
            bytes = self.ps.content_len(),
            "write cache spilled"
        );
        self.ps.reset();
        Ok(())
    }

    /// Clips the buffered patches to `size`.
    pub fn truncate(&mut self, size: u64) {
        self.ps.truncate(size);
    }

    /// Number of buffered patches.
    pub fn patch_count(&self) -> usize {
        self.ps.len()
    }

    /// Total buffered byte count.
    pub fn content_len(&self) -> u64 {
        self.ps.content_len()
    }
}

impl Default for FileWriteCache {
    fn default() -> Self {
        Self::new()
    }
}
