//! Media Cipher: whole-file encryption with nonce-prefixed frames.
//!
//! Frame layout (no header, no length prefix):
//! ```text
//! [24-byte nonce][ciphertext || 16-byte tag]
//! ```
//! New frames are always sealed with AAD
//! `media:<kind>:<network>:<identifier>[:<media id>]`. Decryption also tries
//! the two older AAD formats (see [`ircx_crypto::aad::media_candidates`]) so
//! media stored by earlier clients keeps opening.
//!
//! The cipher reads and writes local files only; uploading and downloading
//! frames is the caller's job.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ircx_core::{ConversationRef, E2eeError, E2eeResult};
use ircx_crypto::aad::{media_candidates, MediaAadFormat};
use ircx_crypto::{aead, codec, sniff, Aad, MimeGuess, NONCE_SIZE};
use ircx_keystore::{CryptoReady, KeyResolver};

use crate::context::resolve;
use crate::multipart;

/// Extension of frame files written by [`MediaCipher::encrypt_file`].
pub const FRAME_EXTENSION: &str = "enc";

/// A nonce-prefixed media frame. Always at least [`NONCE_SIZE`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMediaFrame(Vec<u8>);

impl EncryptedMediaFrame {
    pub fn from_bytes(bytes: Vec<u8>) -> E2eeResult<Self> {
        aead::split_frame(&bytes)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn nonce(&self) -> &[u8] {
        &self.0[..NONCE_SIZE]
    }

    pub fn ciphertext(&self) -> &[u8] {
        &self.0[NONCE_SIZE..]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text form for transports that cannot carry binary (file codec).
    pub fn to_base64(&self) -> String {
        codec::file_to_b64(&self.0)
    }

    pub fn from_base64(s: &str) -> E2eeResult<Self> {
        Self::from_bytes(codec::file_from_b64(s)?)
    }
}

/// Result of [`MediaCipher::encrypt_file`].
#[derive(Debug, Clone)]
pub struct EncryptedFile {
    pub path: PathBuf,
    pub len: u64,
}

/// Plaintext recovered by [`MediaCipher::decrypt_bytes`].
#[derive(Debug, Clone)]
pub struct DecryptedMedia {
    pub bytes: Vec<u8>,
    pub mime: MimeGuess,
    /// AAD format the frame was sealed with
    pub format: MediaAadFormat,
}

/// Result of [`MediaCipher::decrypt_file`].
#[derive(Debug, Clone)]
pub struct DecryptedFile {
    pub path: PathBuf,
    pub mime: &'static str,
    pub extension: &'static str,
    pub len: u64,
}

pub struct MediaCipher<R> {
    keys: Arc<R>,
    ready: CryptoReady,
    /// Directory frames and decrypted output are written to
    temp_dir: PathBuf,
}

impl<R> Clone for MediaCipher<R> {
    fn clone(&self) -> Self {
        Self {
            keys: Arc::clone(&self.keys),
            ready: self.ready.clone(),
            temp_dir: self.temp_dir.clone(),
        }
    }
}

impl<R: KeyResolver> MediaCipher<R> {
    pub fn new(keys: Arc<R>, ready: CryptoReady, temp_dir: PathBuf) -> Self {
        Self {
            keys,
            ready,
            temp_dir,
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Seal `plaintext` into a frame for `conversation`.
    pub async fn encrypt_bytes(
        &self,
        plaintext: &[u8],
        conversation: &ConversationRef,
        media_id: Option<&str>,
    ) -> E2eeResult<EncryptedMediaFrame> {
        self.ready.wait().await?;
        let ctx = resolve(self.keys.as_ref(), conversation).await?;
        let aad = Aad::media(
            conversation.kind,
            &conversation.network,
            &ctx.identifier,
            media_id,
        );
        let frame = aead::seal_frame(&ctx.key, plaintext, &aad)?;
        tracing::debug!(%conversation, len = plaintext.len(), "encrypted media");
        Ok(EncryptedMediaFrame(frame))
    }

    /// Open a downloaded buffer: unwrap a multipart envelope if present,
    /// then try each AAD format newest first. When the buffer looked like an
    /// envelope but its body opens under no format, the whole buffer is
    /// tried as a raw frame before giving up.
    pub async fn decrypt_bytes(
        &self,
        data: &[u8],
        conversation: &ConversationRef,
        media_id: Option<&str>,
    ) -> E2eeResult<DecryptedMedia> {
        self.ready.wait().await?;
        let body = multipart::frame_bytes(data);
        let frames: Vec<&[u8]> = if body.len() == data.len() {
            vec![data]
        } else {
            vec![body, data]
        };

        let mut split = Vec::with_capacity(frames.len());
        let mut too_short = None;
        for frame in frames {
            match aead::split_frame(frame) {
                Ok(parts) => split.push(parts),
                Err(e) => too_short = Some(e),
            }
        }
        if split.is_empty() {
            return Err(too_short.unwrap_or(E2eeError::DecryptFailed));
        }

        let ctx = resolve(self.keys.as_ref(), conversation).await?;
        let candidates = media_candidates(
            conversation.kind,
            &conversation.network,
            &ctx.identifier,
            media_id,
        );
        for (whole_buffer, (nonce, ciphertext)) in split.iter().enumerate() {
            for (attempt, (format, aad)) in candidates.iter().enumerate() {
                match aead::open(&ctx.key, nonce, ciphertext, aad) {
                    Ok(bytes) => {
                        if whole_buffer > 0 {
                            tracing::warn!(%conversation, "multipart body rejected; opened the raw buffer");
                        }
                        if attempt > 0 {
                            tracing::warn!(%conversation, ?format, "media opened with an older AAD format");
                        }
                        let mime = sniff(&bytes);
                        tracing::debug!(%conversation, len = bytes.len(), mime = mime.mime, "decrypted media");
                        return Ok(DecryptedMedia {
                            bytes,
                            mime,
                            format: *format,
                        });
                    }
                    Err(_) => tracing::debug!(?format, "media AAD candidate rejected"),
                }
            }
        }

        tracing::warn!(%conversation, tried = candidates.len() * split.len(), "media decryption failed");
        Err(E2eeError::DecryptFailed)
    }

    /// Encrypt the file at `path` and write the frame to
    /// `<temp dir>/<uuid>.enc`.
    pub async fn encrypt_file(
        &self,
        path: &Path,
        conversation: &ConversationRef,
        media_id: Option<&str>,
    ) -> E2eeResult<EncryptedFile> {
        let plaintext = read_input(path).await?;
        if plaintext.is_empty() {
            return Err(E2eeError::EmptyFile(path.to_path_buf()));
        }
        let frame = self.encrypt_bytes(&plaintext, conversation, media_id).await?;
        let out = self.output_path(FRAME_EXTENSION);
        write_atomic(&out, frame.as_bytes()).await?;
        Ok(EncryptedFile {
            path: out,
            len: frame.len() as u64,
        })
    }

    /// Decrypt the frame at `frame_path` and write the plaintext to
    /// `<temp dir>/<uuid>.<sniffed extension>`.
    pub async fn decrypt_file(
        &self,
        frame_path: &Path,
        conversation: &ConversationRef,
        media_id: Option<&str>,
    ) -> E2eeResult<DecryptedFile> {
        let data = read_input(frame_path).await?;
        let media = self.decrypt_bytes(&data, conversation, media_id).await?;
        let out = self.output_path(media.mime.extension);
        write_atomic(&out, &media.bytes).await?;
        Ok(DecryptedFile {
            path: out,
            mime: media.mime.mime,
            extension: media.mime.extension,
            len: media.bytes.len() as u64,
        })
    }

    fn output_path(&self, extension: &str) -> PathBuf {
        self.temp_dir
            .join(format!("{}.{extension}", uuid::Uuid::new_v4()))
    }
}

async fn read_input(path: &Path) -> E2eeResult<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|source| {
        if source.kind() == ErrorKind::NotFound {
            E2eeError::FileNotFound(path.to_path_buf())
        } else {
            E2eeError::FileAccess {
                path: path.to_path_buf(),
                source,
            }
        }
    })
}

/// Write via a temp file and rename so readers never see a partial file.
async fn write_atomic(path: &Path, data: &[u8]) -> E2eeResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| E2eeError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, data)
        .await
        .map_err(|source| E2eeError::WriteFailed {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| E2eeError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })
}
