//! ircx-crypto: primitives for the ircx end-to-end encryption engine
//!
//! AEAD: XChaCha20-Poly1305, fresh random 192-bit nonce per operation.
//!
//! Key material:
//! ```text
//! Device identity
//!   ├── Ed25519 signing key   (signs the exported bundle)
//!   └── X25519 static key     (DH with each peer's bundle)
//!         └── DM key = HKDF-SHA256(X25519(own, peer), salt = sorted identity keys)
//! Channel key  (256-bit random, shared out-of-band)
//! Backup key   (Argon2id from password, per-backup random salt)
//! ```
//!
//! Every ciphertext is bound to its conversation through an AAD string
//! (see [`aad`]); the AAD itself is never stored.

pub mod aad;
pub mod aead;
pub mod codec;
pub mod identity;
pub mod kdf;
pub mod keys;
pub mod mime;

pub use aad::Aad;
pub use aead::{open, open_frame, seal, seal_frame};
pub use identity::{DeviceIdentity, PeerBundle};
pub use kdf::{derive_backup_key, KdfParams};
pub use keys::{generate_key, SymmetricKey};
pub use mime::{sniff, MimeGuess};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
