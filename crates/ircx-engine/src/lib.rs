//! ircx-engine: end-to-end encryption for IRC messages and media
//!
//! [`E2eeEngine`] is built once at startup from the key stores and handed to
//! the message-send, media and key-management flows. The ciphers hold the
//! stores by handle; there is no global state.
//!
//! ```text
//! E2eeEngine
//!   ├── KeyStores ── DmKeyStore / ChannelKeyStore / BackupService
//!   ├── MessageCipher  (msg:... AAD, JSON payloads)
//!   └── MediaCipher    (media:... AAD, nonce-prefixed frames, fallback chain)
//! ```

mod context;
pub mod media;
pub mod message;
pub mod multipart;

use std::path::PathBuf;
use std::sync::Arc;

use ircx_core::config::EngineConfig;
use ircx_core::types::ConversationKind;
use ircx_core::{ConversationRef, E2eeResult};
use ircx_crypto::{KdfParams, SymmetricKey};
use ircx_keystore::KeyStores;

pub use media::{DecryptedFile, DecryptedMedia, EncryptedFile, EncryptedMediaFrame, MediaCipher};
pub use message::{EncryptedPayload, MessageCipher};

/// The encryption engine: key stores plus the two ciphers over them.
#[derive(Clone)]
pub struct E2eeEngine {
    stores: Arc<KeyStores>,
    messages: MessageCipher<KeyStores>,
    media: MediaCipher<KeyStores>,
}

impl E2eeEngine {
    pub fn new(stores: KeyStores, media_temp_dir: PathBuf) -> Self {
        let ready = stores.ready().clone();
        let stores = Arc::new(stores);
        Self {
            messages: MessageCipher::new(Arc::clone(&stores), ready.clone()),
            media: MediaCipher::new(Arc::clone(&stores), ready, media_temp_dir),
            stores,
        }
    }

    /// Build from configuration. With a store key the key set persists in
    /// the configured encrypted file; without one it lives in memory.
    pub fn from_config(config: &EngineConfig, store_key: Option<SymmetricKey>) -> E2eeResult<Self> {
        let kdf = KdfParams::from(&config.backup);
        let stores = match store_key {
            Some(key) => {
                let path = ircx_core::config::expand_tilde(&config.keystore.path);
                KeyStores::open_file(&path, key, kdf)?
            }
            None => KeyStores::in_memory(kdf),
        };
        Ok(Self::new(stores, config.media.temp_dir()))
    }

    pub fn stores(&self) -> &KeyStores {
        &self.stores
    }

    pub fn messages(&self) -> &MessageCipher<KeyStores> {
        &self.messages
    }

    pub fn media(&self) -> &MediaCipher<KeyStores> {
        &self.media
    }

    /// Await the one-time crypto self test.
    pub async fn ready(&self) -> E2eeResult<()> {
        self.stores.ready().wait().await
    }

    /// Whether outgoing traffic in `conversation` must go through the
    /// ciphers. Callers that get `true` must never fall back to plaintext.
    pub async fn should_encrypt(&self, conversation: &ConversationRef) -> E2eeResult<bool> {
        match conversation.kind {
            ConversationKind::Channel => {
                self.stores
                    .channels
                    .has_channel_key(&conversation.identifier, &conversation.network)
                    .await
            }
            ConversationKind::Query => {
                self.stores
                    .dm
                    .is_encrypted_for_network(&conversation.network, &conversation.identifier)
                    .await
            }
        }
    }
}
