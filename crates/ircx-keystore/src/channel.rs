//! Channel Key Store: one symmetric key per (channel, network).
//!
//! Keys are created by a member with `generate_channel_key`, handed to other
//! members out-of-band via `export_channel_key`, and installed on their side
//! with `import_channel_key`. Generating or importing replaces whatever key
//! was stored; concurrent writers serialize on the store lock and the last
//! one wins.

use serde::{Deserialize, Serialize};

use ircx_core::types::{normalize_name, unix_now};
use ircx_core::{E2eeError, E2eeResult};
use ircx_crypto::{generate_key, SymmetricKey};

use crate::dm::{encode_record, parse_record};
use crate::kv::SharedKv;
use crate::ready::CryptoReady;

pub(crate) const CHANNEL_PREFIX: &str = "chan:";

/// Current channel-key export format version.
pub const EXPORT_VERSION: u32 = 1;

/// A stored channel key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelKey {
    pub channel: String,
    pub network: String,
    /// Key material (key codec base64)
    pub key: String,
    pub created_at: u64,
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelKey")
            .field("channel", &self.channel)
            .field("network", &self.network)
            .field("key", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl ChannelKey {
    pub fn symmetric_key(&self) -> E2eeResult<SymmetricKey> {
        SymmetricKey::from_b64(&self.key)
    }

    /// Listing view without key material.
    pub fn info(&self) -> ChannelKeyInfo {
        ChannelKeyInfo {
            channel: self.channel.clone(),
            network: self.network.clone(),
            created_at: self.created_at,
        }
    }
}

/// A channel key entry as shown in key-management listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelKeyInfo {
    pub channel: String,
    pub network: String,
    pub created_at: u64,
}

#[derive(Serialize, Deserialize)]
struct ChannelKeyExport {
    v: u32,
    channel: String,
    network: String,
    key: String,
}

pub(crate) fn channel_key(channel: &str, network: &str) -> String {
    // Channel names cannot contain ':', so channel-first keys are unambiguous.
    format!("{CHANNEL_PREFIX}{}:{}", normalize_name(channel), normalize_name(network))
}

#[derive(Clone)]
pub struct ChannelKeyStore {
    kv: SharedKv,
    ready: CryptoReady,
}

impl ChannelKeyStore {
    pub fn new(kv: SharedKv, ready: CryptoReady) -> Self {
        Self { kv, ready }
    }

    pub async fn has_channel_key(&self, channel: &str, network: &str) -> E2eeResult<bool> {
        self.ready.wait().await?;
        Ok(self.kv.read().await.get(&channel_key(channel, network)).is_some())
    }

    async fn record(&self, channel: &str, network: &str) -> E2eeResult<ChannelKey> {
        self.ready.wait().await?;
        let key = channel_key(channel, network);
        let kv = self.kv.read().await;
        let raw = kv
            .get(&key)
            .ok_or_else(|| E2eeError::no_channel_key(channel, network))?;
        parse_record(&key, raw)
    }

    pub async fn get_channel_key(&self, channel: &str, network: &str) -> E2eeResult<SymmetricKey> {
        self.record(channel, network).await?.symmetric_key()
    }

    /// Create a fresh random key for (channel, network), replacing any prior key.
    pub async fn generate_channel_key(&self, channel: &str, network: &str) -> E2eeResult<()> {
        self.ready.wait().await?;
        let key = generate_key();
        self.store(channel, network, &key).await?;
        tracing::info!(channel, network, "generated channel key");
        Ok(())
    }

    async fn store(&self, channel: &str, network: &str, key: &SymmetricKey) -> E2eeResult<()> {
        let record = ChannelKey {
            channel: normalize_name(channel),
            network: normalize_name(network),
            key: key.to_b64(),
            created_at: unix_now(),
        };
        let mut kv = self.kv.write().await;
        kv.set(&channel_key(channel, network), encode_record(&record)?);
        kv.flush()
    }

    /// Serialize the key for (channel, network) for out-of-band sharing.
    pub async fn export_channel_key(&self, channel: &str, network: &str) -> E2eeResult<String> {
        let record = self.record(channel, network).await?;
        let export = ChannelKeyExport {
            v: EXPORT_VERSION,
            channel: record.channel.clone(),
            network: record.network.clone(),
            key: record.key.clone(),
        };
        encode_record(&export)
    }

    /// Install a key received from another member, replacing any prior key.
    ///
    /// The key is stored under the caller's (channel, network), since the
    /// sender's network label may differ from ours.
    pub async fn import_channel_key(
        &self,
        channel: &str,
        network: &str,
        exported: &str,
    ) -> E2eeResult<()> {
        self.ready.wait().await?;
        let export: ChannelKeyExport = serde_json::from_str(exported.trim())
            .map_err(|e| E2eeError::InvalidFormat(format!("channel key export: {e}")))?;
        if export.v != EXPORT_VERSION {
            return Err(E2eeError::InvalidFormat(format!(
                "unsupported channel key export version {}",
                export.v
            )));
        }
        let key = SymmetricKey::from_b64(&export.key)?;
        if normalize_name(&export.channel) != normalize_name(channel) {
            tracing::warn!(
                channel,
                exported_for = %export.channel,
                "importing channel key exported for a different channel"
            );
        }
        self.store(channel, network, &key).await?;
        tracing::info!(channel, network, "imported channel key");
        Ok(())
    }

    /// Remove the key for (channel, network); true if one existed.
    pub async fn remove_channel_key(&self, channel: &str, network: &str) -> E2eeResult<bool> {
        self.ready.wait().await?;
        let mut kv = self.kv.write().await;
        let existed = kv.remove(&channel_key(channel, network));
        kv.flush()?;
        if existed {
            tracing::info!(channel, network, "removed channel key");
        }
        Ok(existed)
    }

    pub async fn list_channel_keys(&self) -> E2eeResult<Vec<ChannelKeyInfo>> {
        Ok(self.all_records().await?.iter().map(ChannelKey::info).collect())
    }

    pub(crate) async fn all_records(&self) -> E2eeResult<Vec<ChannelKey>> {
        self.ready.wait().await?;
        let kv = self.kv.read().await;
        let mut records = kv
            .keys_with_prefix(CHANNEL_PREFIX)
            .iter()
            .filter_map(|key| kv.get(key).map(|raw| parse_record::<ChannelKey>(key, raw)))
            .collect::<E2eeResult<Vec<_>>>()?;
        records.sort_by(|a, b| (&a.network, &a.channel).cmp(&(&b.network, &b.channel)));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{shared, MemoryKv};

    fn store() -> ChannelKeyStore {
        ChannelKeyStore::new(shared(MemoryKv::new()), CryptoReady::new())
    }

    #[tokio::test]
    async fn test_generate_and_get() {
        let s = store();
        assert!(!s.has_channel_key("#test", "net1").await.unwrap());
        assert!(s.get_channel_key("#test", "net1").await.unwrap_err().is_missing_key());

        s.generate_channel_key("#test", "net1").await.unwrap();
        assert!(s.has_channel_key("#TEST", "Net1").await.unwrap());
        s.get_channel_key("#test", "net1").await.unwrap();
    }

    #[tokio::test]
    async fn test_generate_supersedes() {
        let s = store();
        s.generate_channel_key("#test", "net1").await.unwrap();
        let first = s.get_channel_key("#test", "net1").await.unwrap();
        s.generate_channel_key("#test", "net1").await.unwrap();
        let second = s.get_channel_key("#test", "net1").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(s.list_channel_keys().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_export_import_shares_key() {
        let alice = store();
        let bob = store();
        alice.generate_channel_key("#test", "net1").await.unwrap();
        let exported = alice.export_channel_key("#test", "net1").await.unwrap();

        bob.import_channel_key("#test", "libera", &exported).await.unwrap();
        assert_eq!(
            alice.get_channel_key("#test", "net1").await.unwrap(),
            bob.get_channel_key("#test", "libera").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_import_rejects_garbage() {
        let s = store();
        for bad in [
            "",
            "{}",
            r##"{"v":9,"channel":"#a","network":"n","key":"AAAA"}"##,
            r##"{"v":1,"channel":"#a","network":"n","key":"AAAA"}"##,
        ] {
            assert!(
                matches!(
                    s.import_channel_key("#a", "n", bad).await,
                    Err(E2eeError::InvalidFormat(_))
                ),
                "{bad:?} should be rejected"
            );
        }
        assert!(!s.has_channel_key("#a", "n").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let s = store();
        s.generate_channel_key("#test", "net1").await.unwrap();
        assert!(s.remove_channel_key("#test", "net1").await.unwrap());
        assert!(!s.remove_channel_key("#test", "net1").await.unwrap());
        assert!(!s.has_channel_key("#test", "net1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_generate_last_writer_wins() {
        let s = store();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let s = s.clone();
                tokio::spawn(async move { s.generate_channel_key("#race", "net1").await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        let listed = s.list_channel_keys().await.unwrap();
        assert_eq!(listed.len(), 1, "exactly one key survives");
        s.get_channel_key("#race", "net1").await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_has_no_key_material() {
        let s = store();
        s.generate_channel_key("#a", "net1").await.unwrap();
        let json = serde_json::to_string(&s.list_channel_keys().await.unwrap()).unwrap();
        assert!(!json.contains("\"key\""));
    }
}
