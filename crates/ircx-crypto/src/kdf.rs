//! Key derivation: Argon2id password → backup key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use ircx_core::config::BackupConfig;
use ircx_core::{E2eeError, E2eeResult};

use crate::keys::SymmetricKey;
use crate::KEY_SIZE;

/// Size of the random Argon2id salt stored with each backup.
pub const SALT_SIZE: usize = 16;

/// Argon2id parameters for KDF
///
/// Stored inside each backup so a backup made with one configuration still
/// opens after the defaults change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB
    #[serde(rename = "m")]
    pub mem_cost_kib: u32,
    /// Time cost / iterations
    #[serde(rename = "t")]
    pub time_cost: u32,
    /// Parallelism
    #[serde(rename = "p")]
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        BackupConfig::default().into()
    }
}

impl From<BackupConfig> for KdfParams {
    fn from(cfg: BackupConfig) -> Self {
        Self {
            mem_cost_kib: cfg.argon2_mem_cost_kib,
            time_cost: cfg.argon2_time_cost,
            parallelism: cfg.argon2_parallelism,
        }
    }
}

impl From<&BackupConfig> for KdfParams {
    fn from(cfg: &BackupConfig) -> Self {
        cfg.clone().into()
    }
}

/// Derive a 256-bit backup key from a password and salt using Argon2id.
pub fn derive_backup_key(
    password: &SecretString,
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> E2eeResult<SymmetricKey> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| E2eeError::Crypto(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| E2eeError::Crypto(format!("Argon2id KDF failed: {e}")))?;

    Ok(SymmetricKey::from_bytes(key))
}
