//! Base64 codecs.
//!
//! There are two profiles and they must stay separate:
//!
//! - **key profile**: URL-safe alphabet without padding. Every stored key,
//!   bundle, channel-key export, and message payload already persisted by
//!   earlier clients uses this form, so changing it would orphan those keys.
//! - **file profile**: standard alphabet with padding, tolerant of embedded
//!   line breaks. Used for large binary blobs (backups, media frames carried
//!   as text) where servers and mail clients like to re-wrap lines.

use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use ircx_core::{E2eeError, E2eeResult};

const KEY_PROFILE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Encode key material with the key profile.
pub fn key_to_b64(data: &[u8]) -> String {
    KEY_PROFILE.encode(data)
}

/// Decode key material written with the key profile.
pub fn key_from_b64(s: &str) -> E2eeResult<Vec<u8>> {
    KEY_PROFILE
        .decode(s.trim())
        .map_err(|e| E2eeError::InvalidFormat(format!("key base64: {e}")))
}

/// Decode key-profile base64 into a fixed-size array, checking the length.
pub fn key_from_b64_array<const N: usize>(s: &str, what: &str) -> E2eeResult<[u8; N]> {
    let bytes = key_from_b64(s)?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        E2eeError::InvalidFormat(format!("{what} must be {N} bytes, got {}", v.len()))
    })
}

/// Encode a binary blob with the file profile.
pub fn file_to_b64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode a file-profile blob, ignoring ASCII whitespace (line wrapping).
pub fn file_from_b64(s: &str) -> E2eeResult<Vec<u8>> {
    let compact: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact)
        .map_err(|e| E2eeError::InvalidFormat(format!("file base64: {e}")))
}
