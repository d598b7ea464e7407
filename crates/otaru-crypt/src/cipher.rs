//! AES-256-GCM cipher wrapper sealing and opening single frames.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{CryptError, CryptResult};

/// Nonce length fixed by AES-GCM.
pub const NONCE_LEN: usize = 12;

/// Authentication tag length fixed by AES-GCM.
pub const TAG_LEN: usize = 16;

/// Per-frame overhead: nonce prefix plus authentication tag.
pub const FRAME_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// Maximum plaintext payload carried by a single frame.
pub const MAX_FRAME_PAYLOAD: usize = 256 * 1024;

/// AES-256-GCM cipher bound to a single 256-bit key.
///
/// Immutable for the lifetime of the filesystem instance; shared freely
/// across threads. The key material is zeroized when the last clone drops.
#[derive(Clone)]
pub struct Cipher {
    key: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cipher([REDACTED])")
    }
}

impl Cipher {
    /// Creates a cipher from raw 32-byte key material.
    pub fn new(key: &[u8]) -> CryptResult<Self> {
        if key.len() != 32 {
            return Err(CryptError::InvalidKeyLength {
                expected: 32,
                actual: key.len(),
            });
        }
        let mut km = [0u8; 32];
        km.copy_from_slice(key);
        Ok(Self {
            key: Zeroizing::new(km),
        })
    }

    fn aead(&self) -> Aes256Gcm {
        Aes256Gcm::new_from_slice(self.key.as_ref()).expect("key length validated at construction")
    }

    /// Returns the encrypted size of a frame carrying `payload_len` plaintext bytes.
    pub fn encrypted_frame_size(&self, payload_len: usize) -> usize {
        payload_len + FRAME_OVERHEAD
    }

    /// Seals one frame with a fresh random nonce: `nonce ‖ ciphertext ‖ tag`.
    pub fn seal_frame(&self, plain: &[u8]) -> CryptResult<Vec<u8>> {
        if plain.len() > MAX_FRAME_PAYLOAD {
            return Err(CryptError::FrameTooLarge {
                len: plain.len(),
                max: MAX_FRAME_PAYLOAD,
            });
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ct = self
            .aead()
            .encrypt(aes_gcm::Nonce::from_slice(&nonce), plain)
            .map_err(|_| CryptError::SealFailed)?;

        let mut frame = Vec::with_capacity(NONCE_LEN + ct.len());
        frame.extend_from_slice(&nonce);
        frame.extend_from_slice(&ct);
        debug_assert_eq!(frame.len(), self.encrypted_frame_size(plain.len()));
        Ok(frame)
    }

    /// Opens one frame, verifying the tag. The frame must be exactly
    /// `nonce ‖ ciphertext ‖ tag` for a single payload.
    pub fn open_frame(&self, frame: &[u8]) -> CryptResult<Vec<u8>> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(CryptError::TruncatedFrame {
                expected: FRAME_OVERHEAD,
                actual: frame.len(),
            });
        }
        let (nonce, ct) = frame.split_at(NONCE_LEN);
        self.aead()
            .decrypt(aes_gcm::Nonce::from_slice(nonce), ct)
            .map_err(|_| CryptError::AuthFailed)
    }
}
