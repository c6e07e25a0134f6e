//! Multipart envelope unwrapping for downloaded media frames.
//!
//! Some upload services hand back the stored object still wrapped in the
//! `multipart/form-data` body it was uploaded with:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Disposition: form-data; name="file"; filename="x.enc"\r\n
//! Content-Type: application/octet-stream\r\n
//! \r\n
//! <frame bytes>\r\n
//! --<boundary>--\r\n
//! ```
//!
//! Detection is strict (leading `--`, a valid boundary line, a blank line
//! ending the part headers) so that a raw frame whose random nonce happens
//! to start with `--` is left alone.

/// Longest boundary RFC 2046 allows.
const MAX_BOUNDARY_LEN: usize = 70;

/// Part headers larger than this are not a form-data envelope.
const MAX_HEADER_LEN: usize = 8 * 1024;

/// Return the first part's body if `buf` is a multipart envelope.
pub fn unwrap(buf: &[u8]) -> Option<&[u8]> {
    if !buf.starts_with(b"--") {
        return None;
    }

    let first_nl = find(buf, b"\n")?;
    let boundary = trim_cr(&buf[2..first_nl]);
    if !is_valid_boundary(boundary) {
        return None;
    }

    // Walk header lines until the blank line.
    let mut pos = first_nl + 1;
    let body_start = loop {
        if pos - first_nl > MAX_HEADER_LEN {
            return None;
        }
        let nl = pos + find(&buf[pos..], b"\n")?;
        if trim_cr(&buf[pos..nl]).is_empty() {
            break nl + 1;
        }
        pos = nl + 1;
    };

    let body = &buf[body_start..];
    let mut delimiter = Vec::with_capacity(boundary.len() + 2);
    delimiter.extend_from_slice(b"--");
    delimiter.extend_from_slice(boundary);

    let body_end = find_delimiter(body, &delimiter).unwrap_or(body.len());
    Some(trim_line_end(&body[..body_end]))
}

/// The frame inside `buf`: the unwrapped body, or `buf` itself.
pub fn frame_bytes(buf: &[u8]) -> &[u8] {
    match unwrap(buf) {
        Some(body) => {
            tracing::debug!(
                envelope = buf.len(),
                body = body.len(),
                "unwrapped multipart media envelope"
            );
            body
        }
        None => buf,
    }
}

fn is_valid_boundary(boundary: &[u8]) -> bool {
    // bchars from RFC 2046; a space may not be last.
    !boundary.is_empty()
        && boundary.len() <= MAX_BOUNDARY_LEN
        && boundary.last() != Some(&b' ')
        && boundary
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || b"'()+_,-./:=? ".contains(b))
}

/// First occurrence of `delimiter` at the start of `body` or of a line in it.
fn find_delimiter(body: &[u8], delimiter: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = find(&body[from..], delimiter) {
        let at = from + rel;
        if at == 0 || body[at - 1] == b'\n' {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Drop one trailing `\r\n` or `\n`.
fn trim_line_end(body: &[u8]) -> &[u8] {
    body.strip_suffix(b"\r\n")
        .or_else(|| body.strip_suffix(b"\n"))
        .unwrap_or(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(boundary: &str, eol: &str, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(format!("--{boundary}{eol}").as_bytes());
        out.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"x.enc\"{eol}")
                .as_bytes(),
        );
        out.extend_from_slice(format!("Content-Type: application/octet-stream{eol}{eol}").as_bytes());
        out.extend_from_slice(body);
        out.extend_from_slice(format!("{eol}--{boundary}--{eol}").as_bytes());
        out
    }

    #[test]
    fn test_crlf_envelope() {
        let body = b"\x00\x01binary\r\n\x02body";
        let buf = envelope("----WebKitFormBoundary7MA4YWxkTrZu0gW", "\r\n", body);
        assert_eq!(unwrap(&buf), Some(&body[..]));
    }

    #[test]
    fn test_lf_envelope() {
        let body = b"frame bytes";
        let buf = envelope("abc123", "\n", body);
        assert_eq!(unwrap(&buf), Some(&body[..]));
    }

    #[test]
    fn test_body_containing_boundary_mid_line() {
        let body = b"xx--abc123yy";
        let buf = envelope("abc123", "\r\n", body);
        assert_eq!(unwrap(&buf), Some(&body[..]));
    }

    #[test]
    fn test_missing_closing_boundary_takes_rest() {
        let buf = b"--b\r\nContent-Type: x\r\n\r\npayload\r\n";
        assert_eq!(unwrap(buf), Some(&b"payload"[..]));
    }

    #[test]
    fn test_no_headers() {
        let buf = b"--b\r\n\r\npayload\r\n--b--";
        assert_eq!(unwrap(buf), Some(&b"payload"[..]));
    }

    #[test]
    fn test_raw_frames_pass_through() {
        assert_eq!(unwrap(b"\x00\x01\x02"), None);
        // Starts with "--" but the "boundary" holds bytes no boundary can.
        let raw = b"--\xff\xfe\x00\x10garbage\nmore\n\nrest";
        assert_eq!(unwrap(raw), None);
        assert_eq!(frame_bytes(raw), &raw[..]);
        // Valid-looking first line but no header terminator.
        assert_eq!(unwrap(b"--abc\r\nContent-Type: x"), None);
        // Empty boundary.
        assert_eq!(unwrap(b"--\r\n\r\nbody"), None);
    }
}
