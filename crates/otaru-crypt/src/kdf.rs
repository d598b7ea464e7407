//! Password-based key derivation.

use hkdf::Hkdf;
use sha2::Sha256;

/// Domain-separation salt for filesystem keys.
const KDF_SALT: &[u8] = b"otaru-fs-key-v1";

/// HKDF info string binding the derived key to its purpose.
const KDF_INFO: &[u8] = b"otaru-blob-cipher";

/// Derives the 256-bit filesystem cipher key from a password.
///
/// Deterministic: the same password always yields the same key.
pub fn key_from_password(password: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(Some(KDF_SALT), password.as_bytes());
    let mut okm = [0u8; 32];
    hk.expand(KDF_INFO, &mut okm)
        .expect("HKDF expand with 32-byte output cannot fail");
    okm
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        assert_eq!(key_from_password("hunter2"), key_from_password("hunter2"));
    }

    #[test]
    fn different_passwords_differ() {
        assert_ne!(key_from_password("hunter2"), key_from_password("hunter3"));
    }

    #[test]
    fn empty_password_still_derives() {
        let key = key_from_password("");
        assert_eq!(key.len(), 32);
        assert_ne!(key, [0u8; 32]);
    }

    #[test]
    fn derived_key_builds_cipher() {
        let key = key_from_password("correct horse battery staple");
        assert!(crate::Cipher::new(&key).is_ok());
    }
}
