#![warn(missing_docs)]

//! Otaru crypt subsystem: AES-256-GCM frame codec, streaming encrypt/decrypt, password KDF
//!
//! Everything stored in the blob store is a sequence of AEAD frames
//! (`nonce ‖ ciphertext ‖ tag`). This crate provides the cipher wrapper,
//! the fixed-ceiling frame streams, and the key-derivation entry point.

pub mod cipher;
pub mod error;
pub mod frame;
pub mod kdf;

pub use cipher::{Cipher, FRAME_OVERHEAD, MAX_FRAME_PAYLOAD, NONCE_LEN, TAG_LEN};
pub use error::{CryptError, CryptResult};
pub use frame::{decrypt, encrypt, DecryptStream, EncryptStream};
pub use kdf::key_from_password;
