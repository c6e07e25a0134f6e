//! Conversation addressing shared by the key stores and the ciphers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of conversation a ciphertext belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Channel,
    Query,
}

impl ConversationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationKind::Channel => "channel",
            ConversationKind::Query => "query",
        }
    }
}

impl fmt::Display for ConversationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "channel" => Ok(ConversationKind::Channel),
            "query" | "dm" => Ok(ConversationKind::Query),
            other => Err(format!("unknown conversation kind: {other}")),
        }
    }
}

/// A conversation as the tab model sees it: a channel or a query (DM) with
/// one nick, on one network.
///
/// Network and identifier are normalized on construction so both ends of a
/// conversation build identical AAD strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationRef {
    pub kind: ConversationKind,
    pub network: String,
    pub identifier: String,
}

impl ConversationRef {
    pub fn new(kind: ConversationKind, network: &str, identifier: &str) -> Self {
        Self {
            kind,
            network: normalize_name(network),
            identifier: normalize_name(identifier),
        }
    }

    pub fn channel(network: &str, channel: &str) -> Self {
        Self::new(ConversationKind::Channel, network, channel)
    }

    pub fn query(network: &str, nick: &str) -> Self {
        Self::new(ConversationKind::Query, network, nick)
    }

    pub fn is_channel(&self) -> bool {
        self.kind == ConversationKind::Channel
    }
}

impl fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.kind, self.network, self.identifier)
    }
}

/// Case-fold a network, channel, or nick name for use as a key-store or AAD
/// identity. ASCII only: IRC servers differ on the RFC 1459 extras, and
/// both peers must agree byte-for-byte.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_ref_normalizes() {
        let a = ConversationRef::channel("Libera", "#Rust");
        let b = ConversationRef::channel(" libera", "#rust ");
        assert_eq!(a, b);
        assert_eq!(a.network, "libera");
        assert_eq!(a.identifier, "#rust");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("channel".parse::<ConversationKind>().unwrap(), ConversationKind::Channel);
        assert_eq!("Query".parse::<ConversationKind>().unwrap(), ConversationKind::Query);
        assert_eq!("dm".parse::<ConversationKind>().unwrap(), ConversationKind::Query);
        assert!("server".parse::<ConversationKind>().is_err());
    }

    #[test]
    fn test_display() {
        let q = ConversationRef::query("net1", "Bob");
        assert_eq!(q.to_string(), "query:net1/bob");
    }
}
