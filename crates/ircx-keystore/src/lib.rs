//! ircx-keystore: persisted key material for the ircx encryption engine
//!
//! - [`dm`]: device identity plus peer DM bundles keyed by (network, nick)
//! - [`channel`]: one symmetric key per (channel, network)
//! - [`backup`]: password-protected export/restore of everything above
//! - [`kv`]: memory and encrypted-file backends shared by the stores
//! - [`ready`]: one-time crypto self test every entry point awaits

pub mod backup;
pub mod channel;
pub mod dm;
pub mod kv;
pub mod ready;

use std::future::Future;
use std::path::Path;

use ircx_core::E2eeResult;
use ircx_crypto::{KdfParams, SymmetricKey};

pub use backup::BackupService;
pub use channel::{ChannelKey, ChannelKeyInfo, ChannelKeyStore};
pub use dm::{DmContext, DmKeyBundle, DmKeyStore};
pub use kv::{shared, EncryptedFileKv, KeyValueBackend, MemoryKv, SharedKv};
pub use ready::CryptoReady;

/// Key lookups the ciphers depend on.
///
/// Implemented by [`KeyStores`]; tests and embedders can supply their own.
pub trait KeyResolver: Send + Sync {
    /// The symmetric key for (channel, network), or `NoKey`.
    fn channel_key(
        &self,
        channel: &str,
        network: &str,
    ) -> impl Future<Output = E2eeResult<SymmetricKey>> + Send;

    /// The derived DM key and conversation id for (network, nick), or `NoKey`.
    fn dm_context(
        &self,
        network: &str,
        nick: &str,
    ) -> impl Future<Output = E2eeResult<DmContext>> + Send;
}

/// All stores over one shared backend and one readiness barrier.
#[derive(Clone)]
pub struct KeyStores {
    pub dm: DmKeyStore,
    pub channels: ChannelKeyStore,
    pub backup: BackupService,
    ready: CryptoReady,
}

impl KeyStores {
    pub fn new(kv: SharedKv, ready: CryptoReady, kdf: KdfParams) -> Self {
        Self {
            dm: DmKeyStore::new(kv.clone(), ready.clone()),
            channels: ChannelKeyStore::new(kv.clone(), ready.clone()),
            backup: BackupService::new(kv, ready.clone(), kdf),
            ready,
        }
    }

    /// Non-persistent stores.
    pub fn in_memory(kdf: KdfParams) -> Self {
        Self::new(shared(MemoryKv::new()), CryptoReady::new(), kdf)
    }

    /// Stores persisted to an encrypted file sealed under `store_key`.
    pub fn open_file(path: &Path, store_key: SymmetricKey, kdf: KdfParams) -> E2eeResult<Self> {
        let backend = EncryptedFileKv::open(path, store_key)?;
        Ok(Self::new(shared(backend), CryptoReady::new(), kdf))
    }

    pub fn ready(&self) -> &CryptoReady {
        &self.ready
    }
}

impl KeyResolver for KeyStores {
    async fn channel_key(&self, channel: &str, network: &str) -> E2eeResult<SymmetricKey> {
        self.channels.get_channel_key(channel, network).await
    }

    async fn dm_context(&self, network: &str, nick: &str) -> E2eeResult<DmContext> {
        self.dm.dm_context(network, nick).await
    }
}
