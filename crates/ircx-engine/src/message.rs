//! Message Cipher: short text payloads for channels and DMs.
//!
//! Each payload is sealed under the conversation key with AAD
//! `msg:<kind>:<network>:<identifier>`. The AAD is never transmitted; the
//! receiver rebuilds it from its own view of the conversation, so a payload
//! replayed into another channel or network fails to open.

use std::sync::Arc;

use serde::Deserialize;

use ircx_core::{ConversationRef, E2eeError, E2eeResult};
use ircx_crypto::{aead, codec, Aad, NONCE_SIZE};
use ircx_keystore::{CryptoReady, KeyResolver};

use crate::context::resolve;

/// Current payload wire version.
pub const PAYLOAD_VERSION: u32 = 1;

/// A sealed message: nonce plus ciphertext (tag included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

#[derive(Deserialize)]
struct PayloadWire {
    v: u32,
    n: String,
    c: String,
}

impl EncryptedPayload {
    /// Compact JSON form: `{"v":1,"n":"<nonce>","c":"<ciphertext>"}`.
    pub fn to_wire(&self) -> String {
        // URL-safe base64 needs no JSON escaping.
        format!(
            r#"{{"v":{PAYLOAD_VERSION},"n":"{}","c":"{}"}}"#,
            codec::key_to_b64(&self.nonce),
            codec::key_to_b64(&self.ciphertext)
        )
    }

    pub fn from_wire(s: &str) -> E2eeResult<Self> {
        let wire: PayloadWire = serde_json::from_str(s.trim())
            .map_err(|e| E2eeError::InvalidFormat(format!("message payload: {e}")))?;
        if wire.v != PAYLOAD_VERSION {
            return Err(E2eeError::InvalidFormat(format!(
                "unsupported message payload version {}",
                wire.v
            )));
        }
        Ok(Self {
            nonce: codec::key_from_b64_array(&wire.n, "message nonce")?,
            ciphertext: codec::key_from_b64(&wire.c)?,
        })
    }
}

/// Encrypts and decrypts text for one set of key stores.
pub struct MessageCipher<R> {
    keys: Arc<R>,
    ready: CryptoReady,
}

impl<R> Clone for MessageCipher<R> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
            ready: self.ready.clone(),
        }
    }
}

impl<R: KeyResolver> MessageCipher<R> {
    pub fn new(keys: Arc<R>, ready: CryptoReady) -> Self {
        Self { keys, ready }
    }

    pub async fn encrypt_for_channel(
        &self,
        plaintext: &str,
        channel: &str,
        network: &str,
    ) -> E2eeResult<EncryptedPayload> {
        self.encrypt(&ConversationRef::channel(network, channel), plaintext)
            .await
    }

    pub async fn decrypt_for_channel(
        &self,
        payload: &EncryptedPayload,
        channel: &str,
        network: &str,
    ) -> E2eeResult<String> {
        self.decrypt(&ConversationRef::channel(network, channel), payload)
            .await
    }

    pub async fn encrypt_for_dm(
        &self,
        plaintext: &str,
        network: &str,
        nick: &str,
    ) -> E2eeResult<EncryptedPayload> {
        self.encrypt(&ConversationRef::query(network, nick), plaintext)
            .await
    }

    pub async fn decrypt_for_dm(
        &self,
        payload: &EncryptedPayload,
        network: &str,
        nick: &str,
    ) -> E2eeResult<String> {
        self.decrypt(&ConversationRef::query(network, nick), payload)
            .await
    }

    /// Seal `plaintext` for `conversation` under a fresh nonce.
    pub async fn encrypt(
        &self,
        conversation: &ConversationRef,
        plaintext: &str,
    ) -> E2eeResult<EncryptedPayload> {
        self.ready.wait().await?;
        let ctx = resolve(self.keys.as_ref(), conversation).await?;
        let aad = Aad::message(conversation.kind, &conversation.network, &ctx.identifier);
        let (nonce, ciphertext) = aead::seal(&ctx.key, plaintext.as_bytes(), &aad)?;
        tracing::debug!(%conversation, len = plaintext.len(), "encrypted message");
        Ok(EncryptedPayload { nonce, ciphertext })
    }

    /// Open a payload received in `conversation`.
    pub async fn decrypt(
        &self,
        conversation: &ConversationRef,
        payload: &EncryptedPayload,
    ) -> E2eeResult<String> {
        self.ready.wait().await?;
        let ctx = resolve(self.keys.as_ref(), conversation).await?;
        let aad = Aad::message(conversation.kind, &conversation.network, &ctx.identifier);
        let plaintext =
            aead::open(&ctx.key, &payload.nonce, &payload.ciphertext, &aad).map_err(|e| {
                tracing::warn!(%conversation, "message decryption failed");
                e
            })?;
        String::from_utf8(plaintext)
            .map_err(|_| E2eeError::InvalidFormat("decrypted message is not UTF-8".into()))
    }
}
