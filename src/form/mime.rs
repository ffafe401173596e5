//! Content-type sniffing for file parts.
//!
//! Magic bytes win, then the file extension, then a plain-text heuristic.

use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// Type used when nothing better is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

const SNIFF_LEN: usize = 512;

#[allow(clippy::expect_used)]
static MIME_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    // Static pattern, safe to panic
    Regex::new(r"^[A-Za-z0-9][\w.+-]*/[A-Za-z0-9][\w.+-]*(\s*;.*)?$")
        .expect("mime shape regex is valid")
});

/// Returns true when `candidate` looks like `type/subtype[; params]`.
#[must_use]
pub fn is_plausible_mime(candidate: &str) -> bool {
    MIME_SHAPE.is_match(candidate.trim())
}

/// Sniffs a type from leading bytes.
#[must_use]
pub fn sniff_bytes(head: &[u8]) -> Option<&'static str> {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b", "application/gzip"),
        (b"BM", "image/bmp"),
        (b"\x00\x00\x01\x00", "image/vnd.microsoft.icon"),
        (b"ID3", "audio/mpeg"),
        (b"OggS", "audio/ogg"),
        (b"\x7fELF", "application/x-executable"),
    ];

    if let Some(mime) = SIGNATURES
        .iter()
        .find(|(magic, _)| head.starts_with(magic))
        .map(|(_, mime)| *mime)
    {
        return Some(mime);
    }
    if head.len() >= 12 && head.starts_with(b"RIFF") && &head[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if head.len() >= 12 && &head[4..8] == b"ftyp" {
        return Some("video/mp4");
    }
    None
}

/// Maps a file extension to a type.
#[must_use]
pub fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "html" | "htm" => "text/html",
        "txt" | "text" | "log" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "css" => "text/css",
        "js" => "text/javascript",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => return None,
    };
    Some(mime)
}

fn looks_like_text(head: &[u8]) -> bool {
    if head.is_empty() {
        return false;
    }
    let text = match std::str::from_utf8(head) {
        Ok(text) => text,
        // A multi-byte character may be cut at the sniff boundary.
        Err(error) if error.error_len().is_none() => {
            std::str::from_utf8(&head[..error.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return false,
    };
    text.chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t' | '\x0c'))
}

/// Sniffs the type of a local file. Unreadable files give [`DEFAULT_MIME_TYPE`].
#[must_use]
pub fn sniff_file(path: &Path) -> String {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    if let Ok(file) = std::fs::File::open(path) {
        let _ = file.take(SNIFF_LEN as u64).read_to_end(&mut head);
    }
    sniff_bytes(&head)
        .or_else(|| mime_from_extension(path))
        .or_else(|| looks_like_text(&head).then_some("text/plain"))
        .unwrap_or(DEFAULT_MIME_TYPE)
        .to_string()
}
