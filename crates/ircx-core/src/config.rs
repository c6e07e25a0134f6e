use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{E2eeError, E2eeResult};

/// Top-level engine configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub keystore: KeystoreConfig,
    pub backup: BackupConfig,
    pub media: MediaConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Encrypted key store file (default: ~/.local/share/ircx/keys.store)
    pub path: PathBuf,
    /// Keep the store key in the platform keychain (default: true)
    pub use_keychain: bool,
}

/// Argon2id parameters for password-protected key backups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Argon2id memory cost in KiB (default: 65536 = 64 MiB)
    pub argon2_mem_cost_kib: u32,
    /// Argon2id time cost (iterations, default: 3)
    pub argon2_time_cost: u32,
    /// Argon2id parallelism (default: 1, mobile-friendly)
    pub argon2_parallelism: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Directory for encrypted frames and decrypted output (default: system temp dir)
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/ircx/keys.store"),
            use_keychain: true,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            argon2_mem_cost_kib: 65536,
            argon2_time_cost: 3,
            argon2_parallelism: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl MediaConfig {
    /// Resolved directory for media scratch files.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(std::env::temp_dir)
    }
}

impl EngineConfig {
    /// Parse a TOML document into a config, filling gaps with defaults.
    pub fn from_toml(content: &str) -> E2eeResult<Self> {
        toml::from_str(content).map_err(|e| E2eeError::Config(e.to_string()))
    }

    /// Render as TOML (for `config show`).
    pub fn to_toml(&self) -> E2eeResult<String> {
        toml::to_string_pretty(self).map_err(|e| E2eeError::Config(e.to_string()))
    }

    pub fn validate(&self) -> E2eeResult<()> {
        if self.backup.argon2_mem_cost_kib < 8 * self.backup.argon2_parallelism.max(1) {
            return Err(E2eeError::Config(
                "backup.argon2_mem_cost_kib must be at least 8 KiB per lane".into(),
            ));
        }
        if self.backup.argon2_time_cost == 0 {
            return Err(E2eeError::Config("backup.argon2_time_cost must be >= 1".into()));
        }
        if self.backup.argon2_parallelism == 0 {
            return Err(E2eeError::Config("backup.argon2_parallelism must be >= 1".into()));
        }
        match self.logging.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(E2eeError::Config(format!(
                "logging.format must be \"json\" or \"text\", got \"{other}\""
            ))),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        if let Some(rest) = s.strip_prefix("~/") {
            let home = std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir());
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
