//! Key Bundle Store: this device's identity and the peer bundles it has
//! exchanged, keyed by (network, nick).
//!
//! Peer entries are only mutated here. Identity keys are pinned per entry:
//! a re-exchange presenting a different identity key is refused with
//! `KeyChanged` until the user re-pairs explicitly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use ircx_core::types::{normalize_name, unix_now};
use ircx_core::{E2eeError, E2eeResult};
use ircx_crypto::identity::StoredIdentity;
use ircx_crypto::{DeviceIdentity, PeerBundle, SymmetricKey};

use crate::kv::SharedKv;
use crate::ready::CryptoReady;

pub(crate) const IDENTITY_KEY: &str = "identity";
pub(crate) const DM_PREFIX: &str = "dm:";

/// A peer's exchanged key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmKeyBundle {
    pub network: String,
    pub nick: String,
    /// Peer Ed25519 identity public key (key codec base64)
    pub id_pub: String,
    /// Peer X25519 public key (key codec base64)
    pub enc_pub: String,
    pub fingerprint: String,
    pub verified: bool,
    pub first_seen: u64,
    pub last_seen: u64,
}

impl DmKeyBundle {
    pub fn peer(&self) -> E2eeResult<PeerBundle> {
        PeerBundle::from_b64_parts(&self.id_pub, &self.enc_pub)
    }

    fn new(network: &str, nick: &str, peer: &PeerBundle, now: u64) -> Self {
        let (id_pub, enc_pub) = peer.to_b64_parts();
        Self {
            network: normalize_name(network),
            nick: normalize_name(nick),
            id_pub,
            enc_pub,
            fingerprint: peer.fingerprint(),
            verified: false,
            first_seen: now,
            last_seen: now,
        }
    }
}

/// What the DM cipher needs for one peer: the derived key and the
/// conversation id both ends agree on.
#[derive(Debug, Clone)]
pub struct DmContext {
    pub key: SymmetricKey,
    pub conversation_id: String,
}

pub(crate) fn dm_key(network: &str, nick: &str) -> String {
    // Nicks cannot contain ':', so nick-first keys are unambiguous.
    format!("{DM_PREFIX}{}:{}", normalize_name(nick), normalize_name(network))
}

pub(crate) fn parse_record<T: serde::de::DeserializeOwned>(key: &str, raw: &str) -> E2eeResult<T> {
    serde_json::from_str(raw).map_err(|e| E2eeError::Storage(format!("corrupt record {key}: {e}")))
}

pub(crate) fn encode_record<T: Serialize>(record: &T) -> E2eeResult<String> {
    serde_json::to_string(record).map_err(|e| E2eeError::Storage(format!("encoding record: {e}")))
}

/// Store for DM key bundles and the local device identity.
#[derive(Clone)]
pub struct DmKeyStore {
    kv: SharedKv,
    ready: CryptoReady,
}

impl DmKeyStore {
    pub fn new(kv: SharedKv, ready: CryptoReady) -> Self {
        Self { kv, ready }
    }

    // ── Own identity ─────────────────────────────────────────────────────────

    /// Load this device's identity, creating and persisting one on first use.
    pub async fn identity(&self) -> E2eeResult<Arc<DeviceIdentity>> {
        self.ready.wait().await?;

        {
            let kv = self.kv.read().await;
            if let Some(raw) = kv.get(IDENTITY_KEY) {
                let stored: StoredIdentity = parse_record(IDENTITY_KEY, raw)?;
                return Ok(Arc::new(DeviceIdentity::from_stored(&stored)?));
            }
        }

        let mut kv = self.kv.write().await;
        // Another task may have created it while we waited for the write lock.
        if let Some(raw) = kv.get(IDENTITY_KEY) {
            let stored: StoredIdentity = parse_record(IDENTITY_KEY, raw)?;
            return Ok(Arc::new(DeviceIdentity::from_stored(&stored)?));
        }

        let identity = DeviceIdentity::generate(unix_now());
        kv.set(IDENTITY_KEY, encode_record(&identity.to_stored())?);
        kv.flush()?;
        tracing::info!(fingerprint = %identity.fingerprint(), "generated device identity");
        Ok(Arc::new(identity))
    }

    pub async fn own_fingerprint(&self) -> E2eeResult<String> {
        Ok(self.identity().await?.fingerprint())
    }

    /// Serialize this device's public bundle for sending to a peer.
    pub async fn export_bundle(&self) -> E2eeResult<String> {
        self.identity().await?.export_bundle()
    }

    // ── Peer bundles ─────────────────────────────────────────────────────────

    pub async fn has_bundle(&self, network: &str, nick: &str) -> E2eeResult<bool> {
        self.ready.wait().await?;
        Ok(self.kv.read().await.get(&dm_key(network, nick)).is_some())
    }

    /// Whether DMs with `nick` on `network` should go through the cipher.
    pub async fn is_encrypted_for_network(&self, network: &str, nick: &str) -> E2eeResult<bool> {
        self.has_bundle(network, nick).await
    }

    pub async fn get_bundle(&self, network: &str, nick: &str) -> E2eeResult<Option<DmKeyBundle>> {
        self.ready.wait().await?;
        let key = dm_key(network, nick);
        let kv = self.kv.read().await;
        kv.get(&key).map(|raw| parse_record(&key, raw)).transpose()
    }

    async fn require_bundle(&self, network: &str, nick: &str) -> E2eeResult<DmKeyBundle> {
        self.get_bundle(network, nick)
            .await?
            .ok_or_else(|| E2eeError::no_dm_key(network, nick))
    }

    pub async fn fingerprint(&self, network: &str, nick: &str) -> E2eeResult<String> {
        Ok(self.require_bundle(network, nick).await?.fingerprint)
    }

    /// The derived symmetric key for DMs with `nick` on `network`.
    pub async fn get_message_key(&self, network: &str, nick: &str) -> E2eeResult<SymmetricKey> {
        Ok(self.dm_context(network, nick).await?.key)
    }

    /// Key and AAD identifier for DMs with `nick` on `network`.
    pub async fn dm_context(&self, network: &str, nick: &str) -> E2eeResult<DmContext> {
        let bundle = self.require_bundle(network, nick).await?;
        let peer = bundle.peer()?;
        let identity = self.identity().await?;
        Ok(DmContext {
            key: identity.derive_dm_key(&peer)?,
            conversation_id: identity.dm_conversation_id(&peer),
        })
    }

    /// Validate and store a peer's bundle.
    ///
    /// A first import creates an unverified entry. Re-importing a bundle with
    /// the same identity key refreshes `last_seen` (and the signed encryption
    /// key) while keeping the verification flag. A different identity key
    /// fails with `KeyChanged`; use [`repair_bundle`](Self::repair_bundle).
    pub async fn import_bundle(
        &self,
        network: &str,
        nick: &str,
        bundle: &str,
    ) -> E2eeResult<DmKeyBundle> {
        self.ready.wait().await?;
        let peer = PeerBundle::parse(bundle)?;
        let own = self.identity().await?;
        if peer.id_pub == own.id_public() {
            return Err(E2eeError::InvalidBundleFormat(
                "bundle is this device's own identity".into(),
            ));
        }
        // Reject low-order keys now rather than at first send.
        own.derive_dm_key(&peer)?;

        let key = dm_key(network, nick);
        let now = unix_now();
        let mut kv = self.kv.write().await;

        let record = match kv.get(&key).map(|raw| parse_record::<DmKeyBundle>(&key, raw)) {
            Some(existing) => {
                let mut existing = existing?;
                if existing.peer()?.id_pub != peer.id_pub {
                    tracing::warn!(network, nick, "refusing bundle with changed identity key");
                    return Err(E2eeError::KeyChanged {
                        network: existing.network,
                        nick: existing.nick,
                    });
                }
                existing.enc_pub = peer.to_b64_parts().1;
                existing.last_seen = now;
                existing
            }
            None => DmKeyBundle::new(network, nick, &peer, now),
        };

        kv.set(&key, encode_record(&record)?);
        kv.flush()?;
        tracing::debug!(network, nick, fingerprint = %record.fingerprint, "imported DM bundle");
        Ok(record)
    }

    /// Explicit re-pairing: replace whatever is stored for (network, nick)
    /// with `bundle`, unverified.
    pub async fn repair_bundle(
        &self,
        network: &str,
        nick: &str,
        bundle: &str,
    ) -> E2eeResult<DmKeyBundle> {
        self.ready.wait().await?;
        let peer = PeerBundle::parse(bundle)?;
        self.identity().await?.derive_dm_key(&peer)?;

        let record = DmKeyBundle::new(network, nick, &peer, unix_now());
        let mut kv = self.kv.write().await;
        kv.set(&dm_key(network, nick), encode_record(&record)?);
        kv.flush()?;
        tracing::info!(network, nick, fingerprint = %record.fingerprint, "re-paired DM bundle");
        Ok(record)
    }

    pub async fn set_verified_for_network(
        &self,
        network: &str,
        nick: &str,
        verified: bool,
    ) -> E2eeResult<()> {
        self.ready.wait().await?;
        let key = dm_key(network, nick);
        let mut kv = self.kv.write().await;
        let raw = kv.get(&key).ok_or_else(|| E2eeError::no_dm_key(network, nick))?;
        let mut record: DmKeyBundle = parse_record(&key, raw)?;
        record.verified = verified;
        kv.set(&key, encode_record(&record)?);
        kv.flush()?;
        tracing::debug!(network, nick, verified, "updated DM verification");
        Ok(())
    }

    /// Copy the entry for `nick` from one network to another.
    ///
    /// An entry already at the destination is replaced only if it holds the
    /// same identity key; otherwise this fails with `KeyChanged` and
    /// [`repair_bundle`](Self::repair_bundle) is the way to replace it.
    pub async fn copy_bundle_to_network(
        &self,
        from_network: &str,
        to_network: &str,
        nick: &str,
    ) -> E2eeResult<DmKeyBundle> {
        self.transfer(from_network, to_network, nick, false).await
    }

    /// Copy, then delete the source entry.
    pub async fn move_bundle_to_network(
        &self,
        from_network: &str,
        to_network: &str,
        nick: &str,
    ) -> E2eeResult<DmKeyBundle> {
        self.transfer(from_network, to_network, nick, true).await
    }

    async fn transfer(
        &self,
        from_network: &str,
        to_network: &str,
        nick: &str,
        remove_source: bool,
    ) -> E2eeResult<DmKeyBundle> {
        self.ready.wait().await?;
        let src_key = dm_key(from_network, nick);
        let dst_key = dm_key(to_network, nick);

        let mut kv = self.kv.write().await;
        let raw = kv
            .get(&src_key)
            .ok_or_else(|| E2eeError::no_dm_key(from_network, nick))?;
        let mut record: DmKeyBundle = parse_record(&src_key, raw)?;
        if src_key == dst_key {
            return Ok(record);
        }

        if let Some(raw) = kv.get(&dst_key) {
            let existing: DmKeyBundle = parse_record(&dst_key, raw)?;
            if existing.peer()?.id_pub != record.peer()?.id_pub {
                tracing::warn!(from_network, to_network, nick, "refusing to replace pinned identity key");
                return Err(E2eeError::KeyChanged {
                    network: existing.network,
                    nick: existing.nick,
                });
            }
            // Same identity: a verification made on either side still holds.
            record.verified |= existing.verified;
        }

        record.network = normalize_name(to_network);
        kv.set(&dst_key, encode_record(&record)?);
        if remove_source {
            kv.remove(&src_key);
        }
        kv.flush()?;
        tracing::debug!(from_network, to_network, nick, moved = remove_source, "transferred DM bundle");
        Ok(record)
    }

    /// Delete the entry for (network, nick); true if one existed.
    pub async fn delete_bundle_for_network(&self, network: &str, nick: &str) -> E2eeResult<bool> {
        self.ready.wait().await?;
        let mut kv = self.kv.write().await;
        let existed = kv.remove(&dm_key(network, nick));
        kv.flush()?;
        if existed {
            tracing::debug!(network, nick, "deleted DM bundle");
        }
        Ok(existed)
    }

    pub async fn list_all_keys(&self) -> E2eeResult<Vec<DmKeyBundle>> {
        self.ready.wait().await?;
        let kv = self.kv.read().await;
        let mut bundles = kv
            .keys_with_prefix(DM_PREFIX)
            .iter()
            .filter_map(|key| kv.get(key).map(|raw| parse_record::<DmKeyBundle>(key, raw)))
            .collect::<E2eeResult<Vec<_>>>()?;
        bundles.sort_by(|a, b| (&a.network, &a.nick).cmp(&(&b.network, &b.nick)));
        Ok(bundles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{shared, MemoryKv};

    fn store() -> DmKeyStore {
        DmKeyStore::new(shared(MemoryKv::new()), CryptoReady::new())
    }

    #[tokio::test]
    async fn test_identity_is_stable() {
        let s = store();
        let a = s.own_fingerprint().await.unwrap();
        let b = s.own_fingerprint().await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_import_and_lookup() {
        let alice = store();
        let bob = store();

        assert!(!alice.has_bundle("net1", "bob").await.unwrap());
        let err = alice.get_message_key("net1", "bob").await.unwrap_err();
        assert!(err.is_missing_key());

        let record = alice
            .import_bundle("Net1", "Bob", &bob.export_bundle().await.unwrap())
            .await
            .unwrap();
        assert!(!record.verified);
        assert_eq!(record.nick, "bob");
        assert_eq!(record.fingerprint, bob.own_fingerprint().await.unwrap());
        assert!(alice.has_bundle("net1", "BOB").await.unwrap());
    }

    #[tokio::test]
    async fn test_both_sides_derive_same_key() {
        let alice = store();
        let bob = store();
        alice
            .import_bundle("net1", "bob", &bob.export_bundle().await.unwrap())
            .await
            .unwrap();
        bob.import_bundle("othernet", "alice", &alice.export_bundle().await.unwrap())
            .await
            .unwrap();

        let a = alice.dm_context("net1", "bob").await.unwrap();
        let b = bob.dm_context("othernet", "alice").await.unwrap();
        assert_eq!(a.key, b.key);
        assert_eq!(a.conversation_id, b.conversation_id);
    }

    #[tokio::test]
    async fn test_reimport_keeps_verification_and_bumps_last_seen() {
        let alice = store();
        let bob = store();
        let bundle = bob.export_bundle().await.unwrap();

        let first = alice.import_bundle("net1", "bob", &bundle).await.unwrap();
        alice.set_verified_for_network("net1", "bob", true).await.unwrap();
        let second = alice.import_bundle("net1", "bob", &bundle).await.unwrap();

        assert!(second.verified);
        assert_eq!(second.first_seen, first.first_seen);
        assert!(second.last_seen >= first.last_seen);
    }

    #[tokio::test]
    async fn test_changed_identity_requires_repair() {
        let alice = store();
        let bob = store();
        let impostor = store();

        alice
            .import_bundle("net1", "bob", &bob.export_bundle().await.unwrap())
            .await
            .unwrap();
        alice.set_verified_for_network("net1", "bob", true).await.unwrap();

        let other = impostor.export_bundle().await.unwrap();
        let err = alice.import_bundle("net1", "bob", &other).await.unwrap_err();
        assert!(matches!(err, E2eeError::KeyChanged { .. }));
        assert_eq!(
            alice.fingerprint("net1", "bob").await.unwrap(),
            bob.own_fingerprint().await.unwrap(),
            "refused import must not change the stored key"
        );

        let repaired = alice.repair_bundle("net1", "bob", &other).await.unwrap();
        assert!(!repaired.verified);
        assert_eq!(repaired.fingerprint, impostor.own_fingerprint().await.unwrap());
    }

    #[tokio::test]
    async fn test_own_bundle_rejected() {
        let alice = store();
        let own = alice.export_bundle().await.unwrap();
        let err = alice.import_bundle("net1", "me", &own).await.unwrap_err();
        assert!(matches!(err, E2eeError::InvalidBundleFormat(_)));
    }

    #[tokio::test]
    async fn test_copy_move_delete() {
        let alice = store();
        let bob = store();
        alice
            .import_bundle("net1", "bob", &bob.export_bundle().await.unwrap())
            .await
            .unwrap();

        alice.copy_bundle_to_network("net1", "net2", "bob").await.unwrap();
        assert!(alice.has_bundle("net1", "bob").await.unwrap());
        assert!(alice.has_bundle("net2", "bob").await.unwrap());
        assert_eq!(
            alice.get_bundle("net2", "bob").await.unwrap().unwrap().network,
            "net2"
        );

        alice.move_bundle_to_network("net2", "net3", "bob").await.unwrap();
        assert!(!alice.has_bundle("net2", "bob").await.unwrap());
        assert!(alice.has_bundle("net3", "bob").await.unwrap());

        assert!(alice.delete_bundle_for_network("net1", "bob").await.unwrap());
        assert!(!alice.delete_bundle_for_network("net1", "bob").await.unwrap());

        let all = alice.list_all_keys().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].network, "net3");
    }

    #[tokio::test]
    async fn test_transfer_keeps_pinned_destination() {
        let alice = store();
        let bob = store();
        let impostor = store();
        alice
            .import_bundle("net2", "bob", &bob.export_bundle().await.unwrap())
            .await
            .unwrap();
        alice.set_verified_for_network("net2", "bob", true).await.unwrap();
        alice
            .import_bundle("net1", "bob", &impostor.export_bundle().await.unwrap())
            .await
            .unwrap();

        for moved in [false, true] {
            let result = if moved {
                alice.move_bundle_to_network("net1", "net2", "bob").await
            } else {
                alice.copy_bundle_to_network("net1", "net2", "bob").await
            };
            assert!(matches!(result, Err(E2eeError::KeyChanged { .. })));
        }

        let pinned = alice.get_bundle("net2", "bob").await.unwrap().unwrap();
        assert_eq!(pinned.fingerprint, bob.own_fingerprint().await.unwrap());
        assert!(pinned.verified);
        // The failed move left its source alone.
        assert!(alice.has_bundle("net1", "bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_transfer_same_identity_keeps_verification() {
        let alice = store();
        let bob = store();
        let bundle = bob.export_bundle().await.unwrap();
        alice.import_bundle("net1", "bob", &bundle).await.unwrap();
        alice.import_bundle("net2", "bob", &bundle).await.unwrap();
        alice.set_verified_for_network("net2", "bob", true).await.unwrap();

        let record = alice.copy_bundle_to_network("net1", "net2", "bob").await.unwrap();
        assert!(record.verified);
        assert_eq!(record.network, "net2");
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        let alice = store();
        let err = alice
            .copy_bundle_to_network("net1", "net2", "nobody")
            .await
            .unwrap_err();
        assert!(err.is_missing_key());
    }

    #[tokio::test]
    async fn test_verify_missing_entry() {
        let err = store()
            .set_verified_for_network("net1", "ghost", true)
            .await
            .unwrap_err();
        assert!(err.is_missing_key());
    }
}
