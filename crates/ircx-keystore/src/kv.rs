//! Local key-value store holding every persisted key record.
//!
//! Two backends are available:
//!   - **Memory**: no persistence, for tests and ephemeral sessions.
//!   - **Encrypted file**: loads entirely into memory; on flush the whole map
//!     is serialized to JSON, sealed with XChaCha20-Poly1305 under the store
//!     key, and written atomically via temp+rename.
//!
//! Both implement `KeyValueBackend`, so the stores use either transparently.
//! Values are JSON documents; keys are `<kind>:<name>:<network>` strings.
//!
//! Writes are staged until `flush`. A flush either commits every staged
//! change or, when persisting fails, drops them all, so a failed operation
//! never stays visible. The file backend writes synchronously while the
//! caller holds the store's write lock; the sealed file is a few KiB.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;

use ircx_core::{E2eeError, E2eeResult};
use ircx_crypto::{aead, Aad, SymmetricKey};

const STORE_AAD_LABEL: &str = "keystore-v1";

/// Trait for key-value backends (memory and encrypted file).
pub trait KeyValueBackend: Send + Sync {
    /// Look up a value, staged changes included.
    fn get(&self, key: &str) -> Option<&str>;
    /// Stage an insert or replace.
    fn set(&mut self, key: &str, value: String);
    /// Stage a removal; true if the key existed.
    fn remove(&mut self, key: &str) -> bool;
    /// All keys starting with `prefix`, in sorted order.
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;
    /// Commit staged changes to durable storage. On error every staged
    /// change is discarded.
    fn flush(&mut self) -> E2eeResult<()>;
}

/// Backend shared between the stores. Writers hold the lock across their
/// whole read-modify-write-flush, which serializes mutations of one entry.
pub type SharedKv = Arc<RwLock<Box<dyn KeyValueBackend>>>;

pub fn shared(backend: impl KeyValueBackend + 'static) -> SharedKv {
    let boxed: Box<dyn KeyValueBackend> = Box::new(backend);
    Arc::new(RwLock::new(boxed))
}

/// Committed entries plus the changes staged since the last flush.
/// `None` in `staged` marks a removal.
#[derive(Debug, Default)]
struct Journal {
    committed: BTreeMap<String, String>,
    staged: BTreeMap<String, Option<String>>,
}

impl Journal {
    fn new(committed: BTreeMap<String, String>) -> Self {
        Self {
            committed,
            staged: BTreeMap::new(),
        }
    }

    fn get(&self, key: &str) -> Option<&str> {
        match self.staged.get(key) {
            Some(staged) => staged.as_deref(),
            None => self.committed.get(key).map(String::as_str),
        }
    }

    fn set(&mut self, key: &str, value: String) {
        self.staged.insert(key.to_string(), Some(value));
    }

    fn remove(&mut self, key: &str) -> bool {
        let existed = self.get(key).is_some();
        if existed {
            self.staged.insert(key.to_string(), None);
        }
        existed
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let committed = self
            .committed
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k);
        let staged = self
            .staged
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k);
        let mut keys: Vec<String> = committed
            .chain(staged)
            .filter(|k| self.get(k).is_some())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    fn is_dirty(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Entries as they will be after commit.
    fn merged(&self) -> BTreeMap<String, String> {
        let mut merged = self.committed.clone();
        for (key, value) in &self.staged {
            match value {
                Some(value) => merged.insert(key.clone(), value.clone()),
                None => merged.remove(key),
            };
        }
        merged
    }

    fn commit(&mut self) {
        for (key, value) in std::mem::take(&mut self.staged) {
            match value {
                Some(value) => self.committed.insert(key, value),
                None => self.committed.remove(&key),
            };
        }
    }

    fn rollback(&mut self) {
        if self.is_dirty() {
            tracing::warn!(discarded = self.staged.len(), "rolled back staged key store changes");
        }
        self.staged.clear();
    }
}

// ── Memory backend ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryKv {
    journal: Journal,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for MemoryKv {
    fn get(&self, key: &str) -> Option<&str> {
        self.journal.get(key)
    }
    fn set(&mut self, key: &str, value: String) {
        self.journal.set(key, value);
    }
    fn remove(&mut self, key: &str) -> bool {
        self.journal.remove(key)
    }
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.journal.keys_with_prefix(prefix)
    }
    fn flush(&mut self) -> E2eeResult<()> {
        self.journal.commit();
        Ok(())
    }
}

// ── Encrypted file backend ───────────────────────────────────────────────────

/// Key-value map persisted as one sealed file.
pub struct EncryptedFileKv {
    /// Path to the sealed store file on disk
    path: PathBuf,
    /// Key the file is sealed under
    store_key: SymmetricKey,
    journal: Journal,
}

impl EncryptedFileKv {
    /// Open or create a store at the given path.
    ///
    /// A missing file starts an empty store. A file sealed under a different
    /// key fails with `DecryptFailed`.
    pub fn open(path: &Path, store_key: SymmetricKey) -> E2eeResult<Self> {
        let entries: BTreeMap<String, String> = if path.exists() {
            let sealed = std::fs::read(path).map_err(|source| E2eeError::FileAccess {
                path: path.to_path_buf(),
                source,
            })?;
            let plaintext = aead::open_frame(&store_key, &sealed, &Aad::label(STORE_AAD_LABEL))?;
            serde_json::from_slice(&plaintext)
                .map_err(|e| E2eeError::Storage(format!("parsing {}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), entries = entries.len(), "opened key store");

        Ok(Self {
            path: path.to_path_buf(),
            store_key,
            journal: Journal::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.journal.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journal.committed.is_empty()
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> E2eeResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| E2eeError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_vec(entries)
            .map_err(|e| E2eeError::Storage(format!("serializing key store: {e}")))?;
        let sealed = aead::seal_frame(&self.store_key, &json, &Aad::label(STORE_AAD_LABEL))?;

        // Atomic write: write to temp file, then rename
        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &sealed).map_err(|source| E2eeError::WriteFailed {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &self.path).map_err(|source| E2eeError::WriteFailed {
            path: self.path.clone(),
            source,
        })
    }
}

impl KeyValueBackend for EncryptedFileKv {
    fn get(&self, key: &str) -> Option<&str> {
        self.journal.get(key)
    }

    fn set(&mut self, key: &str, value: String) {
        self.journal.set(key, value);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.journal.remove(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.journal.keys_with_prefix(prefix)
    }

    fn flush(&mut self) -> E2eeResult<()> {
        if !self.journal.is_dirty() {
            return Ok(());
        }
        match self.persist(&self.journal.merged()) {
            Ok(()) => {
                self.journal.commit();
                Ok(())
            }
            Err(e) => {
                self.journal.rollback();
                Err(e)
            }
        }
    }
}
