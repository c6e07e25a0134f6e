//! Device identity and DM key bundles
//!
//! Each device holds one long-term identity:
//! - an Ed25519 signing key (its public half is what fingerprints cover)
//! - an X25519 static key used for the DM key agreement
//!
//! The exported bundle carries both public halves, with the X25519 key
//! signed by the identity key so a relay cannot swap it:
//!
//! ```json
//! {"v":1,"idPub":"<b64>","encPub":"<b64>","sig":"<b64>"}
//! ```
//!
//! The DM key for a pair of devices is
//! `HKDF-SHA256(ikm = X25519(own, peer), salt = lo(idPub) || hi(idPub), info = "ircx-dm-key-v1")`,
//! identical on both sides because the salt is order-independent.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use ircx_core::{E2eeError, E2eeResult};

use crate::codec;
use crate::keys::{hkdf_derive, SymmetricKey};

/// Current bundle format version.
pub const BUNDLE_VERSION: u32 = 1;

const BUNDLE_SIG_CONTEXT: &[u8] = b"ircx-bundle-v1";
const DM_KEY_INFO: &[u8] = b"ircx-dm-key-v1";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleWire {
    v: u32,
    id_pub: String,
    enc_pub: String,
    sig: String,
}

/// Persisted form of the device identity (secret halves, key codec profile).
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredIdentity {
    pub v: u32,
    pub sign_secret: String,
    pub enc_secret: String,
    pub created_at: u64,
}

impl std::fmt::Debug for StoredIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredIdentity")
            .field("v", &self.v)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// This device's long-term identity.
pub struct DeviceIdentity {
    signing: SigningKey,
    enc_secret: StaticSecret,
    created_at: u64,
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("fingerprint", &self.fingerprint())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl DeviceIdentity {
    pub fn generate(created_at: u64) -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
            enc_secret: StaticSecret::random_from_rng(OsRng),
            created_at,
        }
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn id_public(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn enc_public(&self) -> [u8; 32] {
        X25519Public::from(&self.enc_secret).to_bytes()
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.id_public())
    }

    pub fn to_stored(&self) -> StoredIdentity {
        StoredIdentity {
            v: 1,
            sign_secret: codec::key_to_b64(&self.signing.to_bytes()),
            enc_secret: codec::key_to_b64(&self.enc_secret.to_bytes()),
            created_at: self.created_at,
        }
    }

    pub fn from_stored(stored: &StoredIdentity) -> E2eeResult<Self> {
        if stored.v != 1 {
            return Err(E2eeError::InvalidFormat(format!(
                "unsupported identity version {}",
                stored.v
            )));
        }
        let sign: [u8; 32] = codec::key_from_b64_array(&stored.sign_secret, "signing key")?;
        let enc: [u8; 32] = codec::key_from_b64_array(&stored.enc_secret, "encryption key")?;
        Ok(Self {
            signing: SigningKey::from_bytes(&sign),
            enc_secret: StaticSecret::from(enc),
            created_at: stored.created_at,
        })
    }

    /// Serialize this device's public key material for sending to a peer.
    pub fn export_bundle(&self) -> E2eeResult<String> {
        let enc_pub = self.enc_public();
        let sig = self.signing.sign(&bundle_sig_message(&enc_pub));
        let wire = BundleWire {
            v: BUNDLE_VERSION,
            id_pub: codec::key_to_b64(&self.id_public()),
            enc_pub: codec::key_to_b64(&enc_pub),
            sig: codec::key_to_b64(&sig.to_bytes()),
        };
        serde_json::to_string(&wire).map_err(|e| E2eeError::Crypto(format!("bundle encode: {e}")))
    }

    /// This device's own bundle, as a peer would see it after import.
    pub fn public_bundle(&self) -> PeerBundle {
        PeerBundle {
            id_pub: self.id_public(),
            enc_pub: self.enc_public(),
        }
    }

    /// Derive the symmetric DM key shared with `peer`.
    pub fn derive_dm_key(&self, peer: &PeerBundle) -> E2eeResult<SymmetricKey> {
        let shared = self
            .enc_secret
            .diffie_hellman(&X25519Public::from(peer.enc_pub));
        if !shared.was_contributory() {
            return Err(E2eeError::InvalidBundleFormat(
                "peer encryption key is a low-order point".into(),
            ));
        }
        let salt = sorted_pair(&self.id_public(), &peer.id_pub);
        hkdf_derive(shared.as_bytes(), &salt, DM_KEY_INFO)
    }

    /// Stable identifier for the conversation between this device and `peer`,
    /// the same on both ends. Used as the AAD identifier for DMs, since
    /// each side knows the other under a different nick.
    pub fn dm_conversation_id(&self, peer: &PeerBundle) -> String {
        let pair = sorted_pair(&self.id_public(), &peer.id_pub);
        hex::encode(&blake3::hash(&pair).as_bytes()[..16])
    }
}

/// A peer's validated public key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBundle {
    pub id_pub: [u8; 32],
    pub enc_pub: [u8; 32],
}

impl PeerBundle {
    /// Parse and verify an exported bundle.
    pub fn parse(bundle: &str) -> E2eeResult<Self> {
        let wire: BundleWire = serde_json::from_str(bundle.trim())
            .map_err(|e| E2eeError::InvalidBundleFormat(format!("not a bundle: {e}")))?;
        if wire.v != BUNDLE_VERSION {
            return Err(E2eeError::InvalidBundleFormat(format!(
                "unsupported bundle version {}",
                wire.v
            )));
        }

        let bad = |e: E2eeError| E2eeError::InvalidBundleFormat(e.to_string());
        let id_pub: [u8; 32] = codec::key_from_b64_array(&wire.id_pub, "idPub").map_err(bad)?;
        let enc_pub: [u8; 32] = codec::key_from_b64_array(&wire.enc_pub, "encPub").map_err(bad)?;
        let sig: [u8; 64] = codec::key_from_b64_array(&wire.sig, "sig").map_err(bad)?;

        let verifying = VerifyingKey::from_bytes(&id_pub)
            .map_err(|e| E2eeError::InvalidBundleFormat(format!("idPub: {e}")))?;
        verifying
            .verify_strict(&bundle_sig_message(&enc_pub), &Signature::from_bytes(&sig))
            .map_err(|_| E2eeError::InvalidBundleFormat("signature does not verify".into()))?;

        Ok(Self { id_pub, enc_pub })
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.id_pub)
    }

    /// Stored form of the public keys (key codec profile).
    pub fn to_b64_parts(&self) -> (String, String) {
        (codec::key_to_b64(&self.id_pub), codec::key_to_b64(&self.enc_pub))
    }

    pub fn from_b64_parts(id_pub: &str, enc_pub: &str) -> E2eeResult<Self> {
        Ok(Self {
            id_pub: codec::key_from_b64_array(id_pub, "idPub")?,
            enc_pub: codec::key_from_b64_array(enc_pub, "encPub")?,
        })
    }
}

/// Human-readable fingerprint: BLAKE3 of the identity public key, truncated
/// to 20 bytes, hex-encoded in groups of 4.
///
/// Example: "a1b2 c3d4 e5f6 7890 abcd ef01 2345 6789 0abc def0"
pub fn fingerprint(id_pub: &[u8; 32]) -> String {
    let hash = blake3::hash(id_pub);
    let hex = hex::encode(&hash.as_bytes()[..20]);
    hex.as_bytes()
        .chunks(4)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn bundle_sig_message(enc_pub: &[u8; 32]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(BUNDLE_SIG_CONTEXT.len() + 32);
    msg.extend_from_slice(BUNDLE_SIG_CONTEXT);
    msg.extend_from_slice(enc_pub);
    msg
}

fn sorted_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 64] {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(lo);
    out[32..].copy_from_slice(hi);
    out
}
