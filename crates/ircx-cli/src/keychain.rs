//! Store-key provisioning for the encrypted key store.
//!
//! Resolution order:
//!   1. `IRCX_STORE_KEY` (key codec base64), for CI and headless hosts
//!   2. the platform keychain via `keyring` (macOS Keychain, Linux kernel
//!      keyutils, Windows Credential Manager), when `keystore.use_keychain`
//!   3. a `<store>.key` file beside the store, created 0600
//!
//! A missing key is generated and saved on first use.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use ircx_crypto::{generate_key, SymmetricKey};

const SERVICE_NAME: &str = "ircx";
const STORE_KEY_ENTRY: &str = "store-key";

/// Environment override for the store key.
pub const STORE_KEY_ENV: &str = "IRCX_STORE_KEY";

pub fn store_key(store_path: &Path, use_keychain: bool) -> Result<SymmetricKey> {
    if let Ok(mut encoded) = std::env::var(STORE_KEY_ENV) {
        let key = SymmetricKey::from_b64(&encoded).with_context(|| format!("parsing {STORE_KEY_ENV}"));
        encoded.zeroize();
        return key;
    }

    if use_keychain {
        if let Some(secret) = get_secret(STORE_KEY_ENTRY)? {
            return SymmetricKey::from_b64(secret.expose_secret())
                .context("keychain store key is malformed");
        }
        let key = generate_key();
        store_secret(STORE_KEY_ENTRY, &SecretString::from(key.to_b64()))?;
        tracing::info!("generated store key in platform keychain");
        return Ok(key);
    }

    key_file(&key_file_path(store_path))
}

fn key_file_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.as_os_str().to_owned();
    name.push(".key");
    PathBuf::from(name)
}

fn key_file(path: &Path) -> Result<SymmetricKey> {
    if path.exists() {
        let mut encoded = std::fs::read_to_string(path)
            .with_context(|| format!("reading store key: {}", path.display()))?;
        let key = SymmetricKey::from_b64(&encoded)
            .with_context(|| format!("parsing store key: {}", path.display()));
        encoded.zeroize();
        return key;
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }
    let key = generate_key();
    write_private(path, key.to_b64().as_bytes())
        .with_context(|| format!("writing store key: {}", path.display()))?;
    tracing::info!(path = %path.display(), "generated store key file");
    Ok(key)
}

#[cfg(unix)]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)
}

#[cfg(not(unix))]
fn write_private(path: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, data)
}

fn store_secret(key_name: &str, secret: &SecretString) -> Result<()> {
    let entry = keyring::Entry::new(SERVICE_NAME, key_name)
        .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))?;
    entry
        .set_password(secret.expose_secret())
        .map_err(|e| anyhow::anyhow!("keychain store for '{key_name}': {e}"))?;
    tracing::debug!(key = key_name, "stored secret in platform keychain");
    Ok(())
}

fn get_secret(key_name: &str) -> Result<Option<SecretString>> {
    let entry = keyring::Entry::new(SERVICE_NAME, key_name)
        .map_err(|e| anyhow::anyhow!("keychain entry creation: {e}"))?;
    match entry.get_password() {
        Ok(password) => Ok(Some(SecretString::from(password))),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(anyhow::anyhow!("keychain get for '{key_name}': {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_key_file_created_once() {
        let tmp = TempDir::new().unwrap();
        let store = tmp.path().join("data/keys.store");
        let path = key_file_path(&store);
        assert_eq!(path, tmp.path().join("data/keys.store.key"));

        let first = key_file(&path).unwrap();
        let second = key_file(&path).unwrap();
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("keys.store.key");
        key_file(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
