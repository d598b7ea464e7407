//! Chunk index entries: how a file's byte range maps onto chunk blobs.

use serde::{Deserialize, Serialize};

/// One entry in a file's chunk index.
///
/// Per file the entries form a strictly increasing, disjoint sequence;
/// gaps between entries read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    /// Logical byte offset in the file where this chunk begins.
    pub offset: u64,
    /// Plaintext length of the chunk.
    pub length: u64,
    /// Blobpath of the chunk blob.
    pub blob_path: String,
}

impl FileChunk {
    /// Inclusive left edge of the chunk's range.
    pub fn left(&self) -> u64 {
        self.offset
    }

    /// Exclusive right edge of the chunk's range.
    pub fn right(&self) -> u64 {
        self.offset + self.length
    }
}
