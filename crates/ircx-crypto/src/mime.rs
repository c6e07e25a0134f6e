//! Content sniffing for decrypted media.
//!
//! Encrypted frames carry no trustworthy metadata, so the type is recovered
//! from the plaintext's leading bytes. This only decides how a file is named
//! and displayed; nothing security-relevant depends on it.

/// A sniffed content type and its conventional file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MimeGuess {
    pub mime: &'static str,
    pub extension: &'static str,
}

impl MimeGuess {
    pub const JPEG: MimeGuess = MimeGuess::new("image/jpeg", "jpg");
    pub const PNG: MimeGuess = MimeGuess::new("image/png", "png");
    pub const GIF: MimeGuess = MimeGuess::new("image/gif", "gif");
    pub const WEBP: MimeGuess = MimeGuess::new("image/webp", "webp");
    pub const MP4: MimeGuess = MimeGuess::new("video/mp4", "mp4");
    pub const M4A: MimeGuess = MimeGuess::new("audio/mp4", "m4a");
    pub const QUICKTIME: MimeGuess = MimeGuess::new("video/quicktime", "mov");
    pub const MP3: MimeGuess = MimeGuess::new("audio/mpeg", "mp3");
    pub const OCTET_STREAM: MimeGuess = MimeGuess::new("application/octet-stream", "bin");

    const fn new(mime: &'static str, extension: &'static str) -> Self {
        Self { mime, extension }
    }

    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

/// Guess the content type of `data` from its magic bytes.
pub fn sniff(data: &[u8]) -> MimeGuess {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return MimeGuess::JPEG;
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return MimeGuess::PNG;
    }
    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return MimeGuess::GIF;
    }
    if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        return MimeGuess::WEBP;
    }
    // ISO base media: [4-byte box size]["ftyp"][4-byte major brand]
    if data.len() >= 12 && &data[4..8] == b"ftyp" {
        return match &data[8..12] {
            b"M4A " | b"M4B " => MimeGuess::M4A,
            b"qt  " => MimeGuess::QUICKTIME,
            _ => MimeGuess::MP4,
        };
    }
    if data.starts_with(b"ID3") {
        return MimeGuess::MP3;
    }
    // MPEG audio frame sync: 11 set bits. JPEG's FF D8 is caught above.
    if data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0 {
        return MimeGuess::MP3;
    }
    MimeGuess::OCTET_STREAM
}
