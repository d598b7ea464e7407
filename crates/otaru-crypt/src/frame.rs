//! Streaming frame encryption and decryption with a declared total length.
//!
//! A stream is a concatenation of AEAD frames. Every frame except the last
//! carries exactly [`MAX_FRAME_PAYLOAD`](crate::MAX_FRAME_PAYLOAD) plaintext
//! bytes; the last carries the remainder. The declared total plaintext
//! length makes the last frame's size deterministic, so no frame count is
//! embedded — corruption or truncation surfaces as a tag failure.

use std::io::{Read, Write};

use tracing::trace;

use crate::cipher::{Cipher, FRAME_OVERHEAD, MAX_FRAME_PAYLOAD};
use crate::error::{CryptError, CryptResult};

/// Encrypts an arbitrary write sequence into a frame stream on `dst`.
///
/// The stream enforces the declared total plaintext length:
/// [`finish`](EncryptStream::finish) fails if the number of bytes written
/// differs from the length declared at construction.
pub struct EncryptStream<W: Write> {
    dst: W,
    cipher: Cipher,
    declared: u64,
    written: u64,
    buf: Vec<u8>,
}

impl<W: Write> EncryptStream<W> {
    /// Creates a stream that will encrypt exactly `declared` plaintext bytes to `dst`.
    pub fn new(dst: W, cipher: &Cipher, declared: u64) -> Self {
        Self {
            dst,
            cipher: cipher.clone(),
            declared,
            written: 0,
            buf: Vec::with_capacity(MAX_FRAME_PAYLOAD),
        }
    }

    /// Number of plaintext bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    fn flush_frame(&mut self) -> CryptResult<()> {
        let frame = self.cipher.seal_frame(&self.buf)?;
        trace!(len = frame.len(), "emit frame");
        self.dst.write_all(&frame)?;
        self.buf.clear();
        Ok(())
    }

    /// Appends plaintext, sealing and emitting a frame whenever the
    /// internal buffer reaches the payload ceiling.
    pub fn write(&mut self, mut p: &[u8]) -> CryptResult<()> {
        while !p.is_empty() {
            let room = MAX_FRAME_PAYLOAD - self.buf.len();
            let n = room.min(p.len());
            self.buf.extend_from_slice(&p[..n]);
            self.written += n as u64;
            p = &p[n..];

            if self.buf.len() == MAX_FRAME_PAYLOAD {
                self.flush_frame()?;
            }
        }
        Ok(())
    }

    /// Seals any buffered partial frame and verifies the declared length.
    /// An empty partial frame is not emitted. Returns the sink.
    pub fn finish(mut self) -> CryptResult<W> {
        if self.written != self.declared {
            return Err(CryptError::LengthMismatch {
                declared: self.declared,
                written: self.written,
            });
        }
        if !self.buf.is_empty() {
            self.flush_frame()?;
        }
        self.dst.flush()?;
        Ok(self.dst)
    }
}

/// Decrypts a frame stream from `src`, serving plaintext up to the
/// declared total length. Tag verification failure is fatal for the stream.
pub struct DecryptStream<R: Read> {
    src: R,
    cipher: Cipher,
    declared: u64,
    delivered: u64,
    unread: Vec<u8>,
    unread_pos: usize,
    failed: bool,
}

impl<R: Read> DecryptStream<R> {
    /// Creates a stream decrypting exactly `declared` plaintext bytes from `src`.
    pub fn new(src: R, cipher: &Cipher, declared: u64) -> Self {
        Self {
            src,
            cipher: cipher.clone(),
            declared,
            delivered: 0,
            unread: Vec::new(),
            unread_pos: 0,
            failed: false,
        }
    }

    /// True once the declared plaintext length has been fully delivered.
    pub fn has_read_all(&self) -> bool {
        self.delivered == self.declared
    }

    fn decrypt_next_frame(&mut self) -> CryptResult<()> {
        let remaining = (self.declared - self.delivered) as usize;
        let frame_payload = remaining.min(MAX_FRAME_PAYLOAD);
        let encrypted_len = frame_payload + FRAME_OVERHEAD;

        let mut encrypted = vec![0u8; encrypted_len];
        let mut filled = 0;
        while filled < encrypted_len {
            let n = self.src.read(&mut encrypted[filled..])?;
            if n == 0 {
                self.failed = true;
                return Err(CryptError::TruncatedFrame {
                    expected: encrypted_len,
                    actual: filled,
                });
            }
            filled += n;
        }

        match self.cipher.open_frame(&encrypted) {
            Ok(plain) => {
                self.unread = plain;
                self.unread_pos = 0;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Reads plaintext into `p`, returning the number of bytes delivered.
    /// Returns `Ok(0)` at end of stream.
    pub fn read(&mut self, p: &mut [u8]) -> CryptResult<usize> {
        if self.failed {
            return Err(CryptError::AuthFailed);
        }

        let want = p
            .len()
            .min((self.declared - self.delivered) as usize);
        if want == 0 {
            return Ok(0);
        }

        let mut n = 0;
        while n < want {
            if self.unread_pos == self.unread.len() {
                self.decrypt_next_frame()?;
            }

            let avail = self.unread.len() - self.unread_pos;
            let take = avail.min(want - n);
            p[n..n + take].copy_from_slice(&self.unread[self.unread_pos..self.unread_pos + take]);
            self.unread_pos += take;
            n += take;
            self.delivered += take as u64;
        }

        Ok(n)
    }

    /// Reads exactly `p.len()` plaintext bytes or fails.
    pub fn read_exact(&mut self, p: &mut [u8]) -> CryptResult<()> {
        let mut filled = 0;
        while filled < p.len() {
            let n = self.read(&mut p[filled..])?;
            if n == 0 {
                return Err(CryptError::TruncatedFrame {
                    expected: p.len(),
                    actual: filled,
                });
            }
            filled += n;
        }
        Ok(())
    }
}

/// Encrypts a whole buffer into a frame-stream envelope.
pub fn encrypt(cipher: &Cipher, plain: &[u8]) -> CryptResult<Vec<u8>> {
    let mut stream = EncryptStream::new(Vec::new(), cipher, plain.len() as u64);
    stream.write(plain)?;
    stream.finish()
}

/// Decrypts a frame-stream envelope holding `len` plaintext bytes.
pub fn decrypt(cipher: &Cipher, envelope: &[u8], len: u64) -> CryptResult<Vec<u8>> {
    let mut stream = DecryptStream::new(envelope, cipher, len);
    let mut out = vec![0u8; len as usize];
    stream.read_exact(&mut out)?;
    Ok(out)
}
