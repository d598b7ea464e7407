//! Chunk blob readers: sequential and random-access.

use std::io::{Read, Write};

use otaru_blob::BlobHandle;
use otaru_crypt::{Cipher, DecryptStream, FRAME_OVERHEAD, MAX_FRAME_PAYLOAD};
use tracing::trace;

use crate::error::{ChunkError, ChunkResult};
use crate::header::{ChunkHeader, CHUNK_HEADER_LEN};

/// `std::io::Write` adapter advancing through a blob handle.
pub(crate) struct OffsetWriter<'a> {
    bh: &'a dyn BlobHandle,
    pos: u64,
}

impl<'a> OffsetWriter<'a> {
    pub(crate) fn new(bh: &'a dyn BlobHandle, pos: u64) -> Self {
        Self { bh, pos }
    }
}

impl Write for OffsetWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bh
            .pwrite(self.pos, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// `std::io::Read` adapter advancing through a blob handle.
pub(crate) struct OffsetReader<'a> {
    bh: &'a dyn BlobHandle,
    pos: u64,
}

impl<'a> OffsetReader<'a> {
    pub(crate) fn new(bh: &'a dyn BlobHandle, pos: u64) -> Self {
        Self { bh, pos }
    }
}

impl Read for OffsetReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self
            .bh
            .pread(self.pos, buf)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        self.pos += n as u64;
        Ok(n)
    }
}

fn pread_exact(bh: &dyn BlobHandle, offset: u64, buf: &mut [u8], what: &str) -> ChunkResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = bh.pread(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            return Err(ChunkError::Truncated {
                reason: format!("{}: needed {} bytes, got {}", what, buf.len(), filled),
            });
        }
        filled += n;
    }
    Ok(())
}

/// Sequential chunk reader: header, prologue, then the payload stream.
pub struct ChunkReader<'a> {
    header: ChunkHeader,
    prologue: String,
    stream: DecryptStream<OffsetReader<'a>>,
}

impl<'a> ChunkReader<'a> {
    /// Opens a chunk for sequential reading, validating header and prologue.
    pub fn new(bh: &'a dyn BlobHandle, cipher: &Cipher) -> ChunkResult<Self> {
        let mut raw = [0u8; CHUNK_HEADER_LEN];
        pread_exact(bh, 0, &mut raw, "chunk header")?;
        let header = ChunkHeader::decode(&raw)?;

        let mut pstream = DecryptStream::new(
            OffsetReader::new(bh, CHUNK_HEADER_LEN as u64),
            cipher,
            header.origpath_len as u64,
        );
        let mut pbuf = vec![0u8; header.origpath_len as usize];
        pstream.read_exact(&mut pbuf)?;
        let prologue = String::from_utf8(pbuf).map_err(|_| ChunkError::Corrupt {
            reason: "prologue is not valid UTF-8".to_string(),
        })?;

        let stream = DecryptStream::new(
            OffsetReader::new(bh, header.frame_stream_offset()),
            cipher,
            header.payload_len,
        );

        Ok(Self {
            header,
            prologue,
            stream,
        })
    }

    /// The validated chunk header.
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// Origin filename recorded in the prologue frame.
    pub fn prologue(&self) -> &str {
        &self.prologue
    }

    /// Plaintext payload length.
    pub fn length(&self) -> u64 {
        self.header.payload_len
    }

    /// Reads payload plaintext; `Ok(0)` at end of payload.
    pub fn read(&mut self, p: &mut [u8]) -> ChunkResult<usize> {
        Ok(self.stream.read(p)?)
    }

    /// Reads the entire remaining payload.
    pub fn read_all(&mut self) -> ChunkResult<Vec<u8>> {
        let mut out = vec![0u8; self.header.payload_len as usize];
        let mut filled = 0;
        while filled < out.len() {
            let n = self.stream.read(&mut out[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        out.truncate(filled);
        Ok(out)
    }
}

/// Random-access chunk reader over a blob handle.
///
/// Reads are served at frame granularity: the frame containing the start
/// offset is decrypted whole (frame index = offset / frame max payload)
/// and the requested window copied out.
pub struct ChunkIo<'a> {
    bh: &'a dyn BlobHandle,
    cipher: Cipher,
    header: Option<ChunkHeader>,
}

impl<'a> ChunkIo<'a> {
    /// Creates a lazy random-access reader; the header is read on first use.
    pub fn new(bh: &'a dyn BlobHandle, cipher: &Cipher) -> Self {
        Self {
            bh,
            cipher: cipher.clone(),
            header: None,
        }
    }

    /// Reads and caches the chunk header.
    pub fn header(&mut self) -> ChunkResult<ChunkHeader> {
        if let Some(h) = self.header {
            return Ok(h);
        }
        let mut raw = [0u8; CHUNK_HEADER_LEN];
        pread_exact(self.bh, 0, &mut raw, "chunk header")?;
        let h = ChunkHeader::decode(&raw)?;
        self.header = Some(h);
        Ok(h)
    }

    /// Plaintext payload length of the chunk.
    pub fn payload_len(&mut self) -> ChunkResult<u64> {
        Ok(self.header()?.payload_len)
    }

    /// Decrypts the prologue frame and returns the origin filename.
    pub fn read_prologue(&mut self) -> ChunkResult<String> {
        let h = self.header()?;
        let mut pstream = DecryptStream::new(
            OffsetReader::new(self.bh, CHUNK_HEADER_LEN as u64),
            &self.cipher,
            h.origpath_len as u64,
        );
        let mut pbuf = vec![0u8; h.origpath_len as usize];
        pstream.read_exact(&mut pbuf)?;
        String::from_utf8(pbuf).map_err(|_| ChunkError::Corrupt {
            reason: "prologue is not valid UTF-8".to_string(),
        })
    }

    fn read_content_frame(&self, h: &ChunkHeader, i: u64) -> ChunkResult<Vec<u8>> {
        let frame_origin = i * MAX_FRAME_PAYLOAD as u64;
        let frame_payload = (h.payload_len - frame_origin).min(MAX_FRAME_PAYLOAD as u64) as usize;

        let stride = (MAX_FRAME_PAYLOAD + FRAME_OVERHEAD) as u64;
        let blob_offset = h.frame_stream_offset() + i * stride;

        let mut enc = vec![0u8; frame_payload + FRAME_OVERHEAD];
        pread_exact(self.bh, blob_offset, &mut enc, "content frame")?;

        let plain = self.cipher.open_frame(&enc)?;
        if plain.len() != frame_payload {
            return Err(ChunkError::Corrupt {
                reason: format!(
                    "frame {} payload length mismatch: {} != {}",
                    i,
                    plain.len(),
                    frame_payload
                ),
            });
        }
        trace!(frame = i, len = frame_payload, "read content frame");
        Ok(plain)
    }

    /// Reads `p.len()` payload bytes starting at `offset`.
    pub fn pread(&mut self, offset: u64, p: &mut [u8]) -> ChunkResult<()> {
        if p.is_empty() {
            return Ok(());
        }
        let h = self.header()?;
        if offset + p.len() as u64 > h.payload_len {
            return Err(ChunkError::InvalidArgument {
                msg: format!(
                    "read [{}, {}) beyond chunk payload length {}",
                    offset,
                    offset + p.len() as u64,
                    h.payload_len
                ),
            });
        }

        let mut remo = offset;
        let mut filled = 0;
        while filled < p.len() {
            let i = remo / MAX_FRAME_PAYLOAD as u64;
            let frame = self.read_content_frame(&h, i)?;
            let inframe = (remo - i * MAX_FRAME_PAYLOAD as u64) as usize;

            let n = (p.len() - filled).min(frame.len() - inframe);
            p[filled..filled + n].copy_from_slice(&frame[inframe..inframe + n]);
            remo += n as u64;
            filled += n;
        }
        Ok(())
    }
}
