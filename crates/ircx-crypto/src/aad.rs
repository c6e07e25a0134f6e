//! Associated-data strings binding a ciphertext to its conversation.
//!
//! ```text
//! message: msg:<kind>:<network>:<identifier>
//! media:   media:<kind>:<network>:<identifier>[:<item_id>]
//! ```
//!
//! The prefixes keep the two domains apart: a media ciphertext never opens
//! as a message under the same key, and vice versa. Inputs are used as
//! given; callers pass normalized names (see `ConversationRef`).

use ircx_core::ConversationKind;

/// Which kind of payload the AAD is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Message,
    Media,
}

impl Domain {
    fn prefix(&self) -> &'static str {
        match self {
            Domain::Message => "msg",
            Domain::Media => "media",
        }
    }
}

/// An associated-data value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aad(String);

impl Aad {
    pub fn message(kind: ConversationKind, network: &str, identifier: &str) -> Self {
        Aad(build(Domain::Message, kind, network, identifier, None))
    }

    pub fn media(
        kind: ConversationKind,
        network: &str,
        identifier: &str,
        item_id: Option<&str>,
    ) -> Self {
        Aad(build(Domain::Media, kind, network, identifier, item_id))
    }

    /// No associated data. Only produced by frames from before AAD binding.
    pub fn empty() -> Self {
        Aad(String::new())
    }

    /// A fixed label for containers that are not conversation payloads
    /// (the key store file, backups).
    pub fn label(label: &str) -> Self {
        Aad(format!("ircx:{label}"))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build the AAD string for a conversation context.
///
/// An empty `item_id` is treated as absent.
pub fn build(
    domain: Domain,
    kind: ConversationKind,
    network: &str,
    identifier: &str,
    item_id: Option<&str>,
) -> String {
    let mut aad = format!("{}:{}:{}:{}", domain.prefix(), kind.as_str(), network, identifier);
    if let Some(id) = item_id.filter(|id| !id.is_empty()) {
        aad.push(':');
        aad.push_str(id);
    }
    aad
}

/// A media AAD format, in the order they were introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaAadFormat {
    /// Context plus media id (current; all new frames use this)
    WithMediaId,
    /// Context without media id
    WithoutMediaId,
    /// Empty AAD, from before context binding
    Legacy,
}

/// Candidate AADs for opening a media frame, newest format first.
///
/// Frames carry no version tag, so decryption tries each in turn. A new
/// format must be added to the front of this list, never replace an entry,
/// or media already stored under the older formats stops decrypting.
pub fn media_candidates(
    kind: ConversationKind,
    network: &str,
    identifier: &str,
    media_id: Option<&str>,
) -> Vec<(MediaAadFormat, Aad)> {
    let mut candidates = Vec::with_capacity(3);
    if media_id.is_some_and(|id| !id.is_empty()) {
        candidates.push((
            MediaAadFormat::WithMediaId,
            Aad::media(kind, network, identifier, media_id),
        ));
    }
    candidates.push((
        MediaAadFormat::WithoutMediaId,
        Aad::media(kind, network, identifier, None),
    ));
    candidates.push((MediaAadFormat::Legacy, Aad::empty()));
    candidates
}
