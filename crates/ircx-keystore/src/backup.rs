//! Password-protected backup of the whole key set.
//!
//! Backup format (file codec base64 of this JSON):
//! ```text
//! {"v":1,"kdf":"argon2id","m":65536,"t":3,"p":1,
//!  "salt":"<16 bytes>","nonce":"<24 bytes>","ct":"<sealed payload>"}
//! ```
//! The payload is the JSON key set (device identity, DM bundles, channel
//! keys) sealed with XChaCha20-Poly1305 under an Argon2id key derived from
//! the password. Restore is all-or-nothing: everything is decrypted and
//! validated before the first write.

use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use ircx_core::types::unix_now;
use ircx_core::{E2eeError, E2eeResult};
use ircx_crypto::identity::StoredIdentity;
use ircx_crypto::kdf::SALT_SIZE;
use ircx_crypto::{aead, codec, derive_backup_key, Aad, DeviceIdentity, KdfParams, NONCE_SIZE};

use crate::channel::{channel_key, ChannelKey, CHANNEL_PREFIX};
use crate::dm::{dm_key, encode_record, parse_record, DmKeyBundle, DM_PREFIX, IDENTITY_KEY};
use crate::kv::{KeyValueBackend, SharedKv};
use crate::ready::CryptoReady;

/// Current backup format version.
pub const BACKUP_VERSION: u32 = 1;

const BACKUP_AAD_LABEL: &str = "backup-v1";
const KDF_NAME: &str = "argon2id";

// Upper bounds on KDF parameters read from a backup, so a crafted file
// cannot make restore allocate gigabytes.
const MAX_MEM_COST_KIB: u32 = 1 << 20;
const MAX_TIME_COST: u32 = 64;
const MAX_PARALLELISM: u32 = 16;

#[derive(Debug, Serialize, Deserialize)]
struct BackupEnvelope {
    v: u32,
    kdf: String,
    #[serde(flatten)]
    params: KdfParams,
    salt: String,
    nonce: String,
    ct: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupPayload {
    v: u32,
    created_at: u64,
    identity: Option<StoredIdentity>,
    dm: Vec<DmKeyBundle>,
    channels: Vec<ChannelKey>,
}

/// Exports and restores the key set held in the shared store.
#[derive(Clone)]
pub struct BackupService {
    kv: SharedKv,
    ready: CryptoReady,
    params: KdfParams,
}

impl BackupService {
    pub fn new(kv: SharedKv, ready: CryptoReady, params: KdfParams) -> Self {
        Self { kv, ready, params }
    }

    /// Encrypt the entire key set under `password`.
    pub async fn export_key_backup(&self, password: &SecretString) -> E2eeResult<String> {
        self.ready.wait().await?;

        let payload = {
            let kv = self.kv.read().await;
            collect_payload(&**kv)?
        };
        let plaintext = encode_record(&payload)?;

        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);
        let key = derive_backup_key(password, &salt, &self.params)?;
        let (nonce, ct) = aead::seal(&key, plaintext.as_bytes(), &Aad::label(BACKUP_AAD_LABEL))?;

        let envelope = BackupEnvelope {
            v: BACKUP_VERSION,
            kdf: KDF_NAME.into(),
            params: self.params.clone(),
            salt: codec::key_to_b64(&salt),
            nonce: codec::key_to_b64(&nonce),
            ct: codec::key_to_b64(&ct),
        };
        let json = encode_record(&envelope)?;

        tracing::info!(
            dm = payload.dm.len(),
            channels = payload.channels.len(),
            identity = payload.identity.is_some(),
            "exported key backup"
        );
        Ok(codec::file_to_b64(json.as_bytes()))
    }

    /// Restore a backup made by [`export_key_backup`](Self::export_key_backup).
    ///
    /// Returns the number of DM bundles plus channel keys restored. Entries
    /// with the same identity as existing ones replace them; the device
    /// identity, if present in the backup, replaces the current one.
    pub async fn import_key_backup(&self, data: &str, password: &SecretString) -> E2eeResult<usize> {
        self.ready.wait().await?;

        let envelope = parse_envelope(data)?;
        let salt: [u8; SALT_SIZE] = codec::key_from_b64_array(&envelope.salt, "backup salt")?;
        let nonce: [u8; NONCE_SIZE] = codec::key_from_b64_array(&envelope.nonce, "backup nonce")?;
        let ct = codec::key_from_b64(&envelope.ct)?;

        let key = derive_backup_key(password, &salt, &envelope.params)?;
        let plaintext = aead::open(&key, &nonce, &ct, &Aad::label(BACKUP_AAD_LABEL))?;

        let payload: BackupPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| E2eeError::InvalidFormat(format!("backup payload: {e}")))?;
        validate_payload(&payload)?;

        let mut records = Vec::with_capacity(1 + payload.dm.len() + payload.channels.len());
        if let Some(identity) = &payload.identity {
            records.push((IDENTITY_KEY.to_string(), encode_record(identity)?));
        }
        for bundle in &payload.dm {
            records.push((dm_key(&bundle.network, &bundle.nick), encode_record(bundle)?));
        }
        for channel in &payload.channels {
            records.push((channel_key(&channel.channel, &channel.network), encode_record(channel)?));
        }

        // One flush commits every record or none of them.
        let mut kv = self.kv.write().await;
        for (key, value) in records {
            kv.set(&key, value);
        }
        kv.flush()?;

        let count = payload.dm.len() + payload.channels.len();
        tracing::info!(
            dm = payload.dm.len(),
            channels = payload.channels.len(),
            identity = payload.identity.is_some(),
            "restored key backup"
        );
        Ok(count)
    }
}

fn collect_payload(kv: &dyn KeyValueBackend) -> E2eeResult<BackupPayload> {
    let identity = kv
        .get(IDENTITY_KEY)
        .map(|raw| parse_record::<StoredIdentity>(IDENTITY_KEY, raw))
        .transpose()?;
    let dm = kv
        .keys_with_prefix(DM_PREFIX)
        .iter()
        .filter_map(|key| kv.get(key).map(|raw| parse_record::<DmKeyBundle>(key, raw)))
        .collect::<E2eeResult<Vec<_>>>()?;
    let channels = kv
        .keys_with_prefix(CHANNEL_PREFIX)
        .iter()
        .filter_map(|key| kv.get(key).map(|raw| parse_record::<ChannelKey>(key, raw)))
        .collect::<E2eeResult<Vec<_>>>()?;

    Ok(BackupPayload {
        v: BACKUP_VERSION,
        created_at: unix_now(),
        identity,
        dm,
        channels,
    })
}

fn parse_envelope(data: &str) -> E2eeResult<BackupEnvelope> {
    let json = codec::file_from_b64(data)?;
    let envelope: BackupEnvelope = serde_json::from_slice(&json)
        .map_err(|e| E2eeError::InvalidFormat(format!("backup envelope: {e}")))?;

    if envelope.v != BACKUP_VERSION {
        return Err(E2eeError::InvalidFormat(format!(
            "unsupported backup version {}",
            envelope.v
        )));
    }
    if envelope.kdf != KDF_NAME {
        return Err(E2eeError::InvalidFormat(format!(
            "unsupported backup KDF {}",
            envelope.kdf
        )));
    }
    let p = &envelope.params;
    // Argon2 itself needs t >= 1, p >= 1 and at least 8 KiB of memory per lane.
    let in_range = (1..=MAX_TIME_COST).contains(&p.time_cost)
        && (1..=MAX_PARALLELISM).contains(&p.parallelism)
        && p.mem_cost_kib >= 8 * p.parallelism
        && p.mem_cost_kib <= MAX_MEM_COST_KIB;
    if !in_range {
        return Err(E2eeError::InvalidFormat("backup KDF parameters out of range".into()));
    }
    Ok(envelope)
}

fn validate_payload(payload: &BackupPayload) -> E2eeResult<()> {
    let invalid = |what: String| E2eeError::InvalidFormat(format!("backup entry: {what}"));

    if payload.v != BACKUP_VERSION {
        return Err(invalid(format!("payload version {}", payload.v)));
    }
    if let Some(identity) = &payload.identity {
        DeviceIdentity::from_stored(identity).map_err(|e| invalid(format!("identity: {e}")))?;
    }
    for bundle in &payload.dm {
        bundle
            .peer()
            .map_err(|e| invalid(format!("{}/{}: {e}", bundle.network, bundle.nick)))?;
    }
    for channel in &payload.channels {
        channel
            .symmetric_key()
            .map_err(|e| invalid(format!("{}/{}: {e}", channel.network, channel.channel)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_rejects_oversized_kdf() {
        let envelope = BackupEnvelope {
            v: BACKUP_VERSION,
            kdf: KDF_NAME.into(),
            params: KdfParams {
                mem_cost_kib: u32::MAX,
                time_cost: 1,
                parallelism: 1,
            },
            salt: String::new(),
            nonce: String::new(),
            ct: String::new(),
        };
        let data = codec::file_to_b64(serde_json::to_string(&envelope).unwrap().as_bytes());
        assert!(matches!(parse_envelope(&data), Err(E2eeError::InvalidFormat(_))));
    }

    #[test]
    fn test_envelope_rejects_degenerate_kdf() {
        for (m, t, p) in [(1024, 0, 1), (1024, 1, 0), (7, 1, 1), (64, 1, 16)] {
            let envelope = BackupEnvelope {
                v: BACKUP_VERSION,
                kdf: KDF_NAME.into(),
                params: KdfParams {
                    mem_cost_kib: m,
                    time_cost: t,
                    parallelism: p,
                },
                salt: String::new(),
                nonce: String::new(),
                ct: String::new(),
            };
            let data = codec::file_to_b64(serde_json::to_string(&envelope).unwrap().as_bytes());
            assert!(
                matches!(parse_envelope(&data), Err(E2eeError::InvalidFormat(_))),
                "m={m} t={t} p={p}"
            );
        }
    }

    #[test]
    fn test_envelope_rejects_unknown_kdf() {
        let data = codec::file_to_b64(
            br#"{"v":1,"kdf":"scrypt","m":1024,"t":1,"p":1,"salt":"","nonce":"","ct":""}"#,
        );
        assert!(matches!(parse_envelope(&data), Err(E2eeError::InvalidFormat(_))));
    }

    #[test]
    fn test_envelope_rejects_non_base64() {
        assert!(matches!(parse_envelope("%%%"), Err(E2eeError::InvalidFormat(_))));
    }
}
