//! Symmetric keys: channel keys, derived DM keys, store and backup keys

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use ircx_core::{E2eeError, E2eeResult};

use crate::codec;
use crate::KEY_SIZE;

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey {
    bytes: [u8; KEY_SIZE],
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> E2eeResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            E2eeError::InvalidFormat(format!(
                "key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self::from_bytes(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Encode with the key codec profile (the persisted form).
    pub fn to_b64(&self) -> String {
        codec::key_to_b64(&self.bytes)
    }

    pub fn from_b64(s: &str) -> E2eeResult<Self> {
        let mut bytes = codec::key_from_b64(s)?;
        let key = Self::from_slice(&bytes);
        bytes.zeroize();
        key
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit key.
pub fn generate_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    SymmetricKey::from_bytes(bytes)
}

/// HKDF-SHA256 key derivation with a domain-specific info string.
pub(crate) fn hkdf_derive(ikm: &[u8], salt: &[u8], info: &[u8]) -> E2eeResult<SymmetricKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(info, &mut okm)
        .map_err(|e| E2eeError::Crypto(format!("HKDF expand failed: {e}")))?;
    Ok(SymmetricKey::from_bytes(okm))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_b64_roundtrip() {
        let key = generate_key();
        let restored = SymmetricKey::from_b64(&key.to_b64()).unwrap();
        assert_eq!(key, restored);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let short = codec::key_to_b64(&[1u8; 16]);
        assert!(SymmetricKey::from_b64(&short).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let key = SymmetricKey::from_bytes([0xAB; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }

    #[test]
    fn test_hkdf_domain_separation() {
        let a = hkdf_derive(&[1u8; 32], b"salt", b"domain-a").unwrap();
        let b = hkdf_derive(&[1u8; 32], b"salt", b"domain-b").unwrap();
        assert_ne!(a, b);
    }
}
