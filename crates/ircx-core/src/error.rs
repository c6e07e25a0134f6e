use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type E2eeResult<T> = Result<T, E2eeError>;

/// Which key a `NoKey` failure was looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    Channel { channel: String, network: String },
    Dm { network: String, nick: String },
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRef::Channel { channel, network } => write!(f, "channel {channel} on {network}"),
            KeyRef::Dm { network, nick } => write!(f, "{nick} on {network}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum E2eeError {
    #[error("no key for {0} (exchange or generate a key first)")]
    NoKey(KeyRef),

    #[error("invalid key bundle: {0}")]
    InvalidBundleFormat(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("encrypted frame too short: {len} bytes (minimum {min})")]
    FrameTooShort { len: usize, min: usize },

    /// AEAD authentication failure. Deliberately carries no detail.
    #[error("decryption failed")]
    DecryptFailed,

    #[error("identity key for {nick} on {network} changed (re-pair to accept the new key)")]
    KeyChanged { network: String, nick: String },

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("file is empty: {}", .0.display())]
    EmptyFile(PathBuf),

    #[error("file access error on {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed for {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("crypto library not ready: {0}")]
    LibraryNotReady(String),

    #[error("key store error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl E2eeError {
    pub fn no_channel_key(channel: &str, network: &str) -> Self {
        E2eeError::NoKey(KeyRef::Channel {
            channel: channel.to_string(),
            network: network.to_string(),
        })
    }

    pub fn no_dm_key(network: &str, nick: &str) -> Self {
        E2eeError::NoKey(KeyRef::Dm {
            network: network.to_string(),
            nick: nick.to_string(),
        })
    }

    /// True when the caller should prompt for a key exchange rather than
    /// report a generic send failure.
    pub fn is_missing_key(&self) -> bool {
        matches!(self, E2eeError::NoKey(_))
    }
}
