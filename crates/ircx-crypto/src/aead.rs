//! XChaCha20-Poly1305 sealing and opening
//!
//! Frame format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! A fresh nonce is drawn from the thread RNG for every seal. With 192-bit
//! nonces, random generation is safe for any realistic message volume under
//! one key.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use ircx_core::{E2eeError, E2eeResult};

use crate::aad::Aad;
use crate::keys::SymmetricKey;
use crate::NONCE_SIZE;

/// Draw a fresh random nonce.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Encrypt `plaintext` under `key`, binding `aad`.
///
/// Returns the nonce and the ciphertext (tag appended).
pub fn seal(
    key: &SymmetricKey,
    plaintext: &[u8],
    aad: &Aad,
) -> E2eeResult<([u8; NONCE_SIZE], Vec<u8>)> {
    let nonce = generate_nonce();
    let ciphertext = seal_with_nonce(key, &nonce, plaintext, aad)?;
    Ok((nonce, ciphertext))
}

/// Encrypt under a caller-chosen nonce. A nonce must never be used twice
/// with one key; everything outside tests goes through [`seal`].
pub fn seal_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
    aad: &Aad,
) -> E2eeResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .encrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| E2eeError::Crypto(format!("encryption failed: {e}")))
}

/// Decrypt `ciphertext` (tag appended) under `key` and `aad`.
///
/// Any authentication failure is reported as the opaque `DecryptFailed`.
pub fn open(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
    aad: &Aad,
) -> E2eeResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| E2eeError::DecryptFailed)
}

/// Encrypt into a single `nonce || ciphertext` frame.
pub fn seal_frame(key: &SymmetricKey, plaintext: &[u8], aad: &Aad) -> E2eeResult<Vec<u8>> {
    let (nonce, ciphertext) = seal(key, plaintext, aad)?;
    let mut frame = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    Ok(frame)
}

/// Split a frame into its nonce and ciphertext.
pub fn split_frame(frame: &[u8]) -> E2eeResult<([u8; NONCE_SIZE], &[u8])> {
    if frame.len() < NONCE_SIZE {
        return Err(E2eeError::FrameTooShort {
            len: frame.len(),
            min: NONCE_SIZE,
        });
    }
    let (nonce_bytes, ciphertext) = frame.split_at(NONCE_SIZE);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(nonce_bytes);
    Ok((nonce, ciphertext))
}

/// Decrypt a `nonce || ciphertext` frame.
pub fn open_frame(key: &SymmetricKey, frame: &[u8], aad: &Aad) -> E2eeResult<Vec<u8>> {
    let (nonce, ciphertext) = split_frame(frame)?;
    open(key, &nonce, ciphertext, aad)
}
