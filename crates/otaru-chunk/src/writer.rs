//! Sequential chunk blob writer.

use otaru_blob::BlobHandle;
use otaru_crypt::{Cipher, EncryptStream};
use tracing::debug;

use crate::error::{ChunkError, ChunkResult};
use crate::header::{ChunkHeader, CHUNK_HEADER_LEN};
use crate::io::OffsetWriter;

/// Writes a chunk blob: header (payload length as a placeholder), the
/// prologue frame carrying the origin filename, then the payload frame
/// stream. [`finish`](ChunkWriter::finish) seeks back and finalizes the
/// header with the payload length actually written.
pub struct ChunkWriter<'a> {
    bh: &'a dyn BlobHandle,
    header: ChunkHeader,
    payload_len: u64,
    stream: EncryptStream<OffsetWriter<'a>>,
}

impl<'a> ChunkWriter<'a> {
    /// Opens a chunk for writing on `bh` and emits the header + prologue.
    ///
    /// `payload_len` declares the plaintext length the caller will write;
    /// `finish` fails if the actual count differs.
    pub fn new(
        bh: &'a dyn BlobHandle,
        cipher: &Cipher,
        origin_offset: u64,
        orig_filename: &str,
        payload_len: u64,
    ) -> ChunkResult<Self> {
        let origpath = orig_filename.as_bytes();
        if origpath.len() > u16::MAX as usize {
            return Err(ChunkError::InvalidArgument {
                msg: format!("origin filename too long: {} bytes", origpath.len()),
            });
        }

        let mut header = ChunkHeader::new(origin_offset, origpath.len() as u16);

        // Header first, with payload_len still zero; the real value lands
        // in finish() once the payload stream has been validated.
        bh.pwrite(0, &header.encode())?;

        let mut prologue = EncryptStream::new(
            OffsetWriter::new(bh, CHUNK_HEADER_LEN as u64),
            cipher,
            origpath.len() as u64,
        );
        prologue.write(origpath)?;
        prologue.finish()?;

        header.payload_len = payload_len;
        let stream = EncryptStream::new(
            OffsetWriter::new(bh, header.frame_stream_offset()),
            cipher,
            payload_len,
        );

        debug!(
            origin_offset,
            payload_len, "chunk writer opened, header and prologue emitted"
        );

        Ok(Self {
            bh,
            header,
            payload_len,
            stream,
        })
    }

    /// Appends payload plaintext.
    pub fn write(&mut self, p: &[u8]) -> ChunkResult<()> {
        self.stream.write(p)?;
        Ok(())
    }

    /// Flushes the final frame and finalizes the header payload length.
    pub fn finish(self) -> ChunkResult<()> {
        self.stream.finish()?;
        self.bh.pwrite(0, &self.header.encode())?;
        debug!(payload_len = self.payload_len, "chunk writer finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::CHUNK_MAGIC;
    use otaru_blob::{BlobStore, MemBlobStore, OpenFlags};

    fn cipher() -> Cipher {
        Cipher::new(&[7u8; 32]).unwrap()
    }

    fn rdwr_create() -> OpenFlags {
        OpenFlags::RDWR.union(OpenFlags::CREATE)
    }

    #[test]
    fn writes_header_prologue_and_payload() {
        let store = MemBlobStore::new();
        let h = store.open("chunk1", rdwr_create()).unwrap();

        let c = cipher();
        let mut w = ChunkWriter::new(&*h, &c, 4096, "/foo.txt", 11).unwrap();
        w.write(b"hello chunk").unwrap();
        w.finish().unwrap();

        let mut raw_header = [0u8; CHUNK_HEADER_LEN];
        h.pread(0, &mut raw_header).unwrap();
        assert_eq!(&raw_header[0..8], &CHUNK_MAGIC);

        let hdr = ChunkHeader::decode(&raw_header).unwrap();
        assert_eq!(hdr.payload_len, 11);
        assert_eq!(hdr.origin_offset, 4096);
        assert_eq!(hdr.origpath_len, 8);

        // header + prologue frame + one payload frame
        let expected_size = hdr.frame_stream_offset() + 11 + 28;
        assert_eq!(h.size().unwrap(), expected_size);
    }

    #[test]
    fn finish_rejects_wrong_payload_count() {
        let store = MemBlobStore::new();
        let h = store.open("chunk1", rdwr_create()).unwrap();

        let c = cipher();
        let mut w = ChunkWriter::new(&*h, &c, 0, "f", 100).unwrap();
        w.write(b"short").unwrap();
        assert!(w.finish().is_err());
    }

    #[test]
    fn placeholder_payload_len_until_finish() {
        let store = MemBlobStore::new();
        let h = store.open("chunk1", rdwr_create()).unwrap();

        let c = cipher();
        let mut w = ChunkWriter::new(&*h, &c, 0, "f", 3).unwrap();

        let mut raw_header = [0u8; CHUNK_HEADER_LEN];
        h.pread(0, &mut raw_header).unwrap();
        assert_eq!(ChunkHeader::decode(&raw_header).unwrap().payload_len, 0);

        w.write(b"abc").unwrap();
        w.finish().unwrap();

        h.pread(0, &mut raw_header).unwrap();
        assert_eq!(ChunkHeader::decode(&raw_header).unwrap().payload_len, 3);
    }
}
