//! Filename derivation, sanitization, and collision-safe target paths.

use std::path::{Component, Path, PathBuf};

use url::Url;

use crate::cookies::unix_now;

/// Extension derived from a Content-Type value, as `.type.subtype`.
///
/// Parameters are dropped and the type is lowercased; an empty type gives `None`.
pub(crate) fn extension_from_content_type(content_type: &str) -> Option<String> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if mime.is_empty() {
        return None;
    }
    let dotted = sanitize_filename(&mime.replace('/', "."));
    Some(format!(".{dotted}"))
}

/// Parses Content-Disposition header to extract filename.
///
/// Handles both:
/// - `attachment; filename="example.pdf"`
/// - `attachment; filename=example.pdf`
/// - `attachment; filename*=UTF-8''example.pdf` (RFC 5987)
pub(crate) fn parse_content_disposition(header: &str) -> Option<String> {
    let lower = header.to_ascii_lowercase();

    if let Some(pos) = lower.find("filename*=") {
        let value = header[pos + 10..].trim();
        // charset'language'encoded_value
        if let Some(quote_pos) = value.find("''") {
            let encoded = &value[quote_pos + 2..];
            let end = encoded.find(';').unwrap_or(encoded.len());
            if let Ok(decoded) = urlencoding::decode(encoded[..end].trim()) {
                return Some(decoded.into_owned());
            }
        }
    }

    let pos = lower.find("filename=")?;
    let value = header[pos + 9..].trim();
    if let Some(stripped) = value.strip_prefix('"') {
        let end = stripped.find('"')?;
        return Some(stripped[..end].to_string()).filter(|name| !name.trim().is_empty());
    }
    let end = value.find(';').unwrap_or(value.len());
    let filename = value[..end].trim();
    (!filename.is_empty()).then(|| filename.to_string())
}

/// Finds the filename in the last `Content-Disposition` line among raw header lines.
pub(crate) fn content_disposition_filename<S: AsRef<str>>(lines: &[S]) -> Option<String> {
    lines.iter().rev().find_map(|line| {
        let (name, value) = line.as_ref().split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-disposition") {
            parse_content_disposition(value.trim())
        } else {
            None
        }
    })
}

/// Sanitizes filename for filesystem safety.
///
/// Replaces characters that are invalid on common filesystems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if is_safe_filename_segment(&sanitized) {
        sanitized
    } else {
        sanitized
            .chars()
            .map(|c| if c == '.' { '_' } else { c })
            .collect()
    }
}

fn is_safe_filename_segment(name: &str) -> bool {
    !Path::new(name).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    })
}

/// Last URL path segment, percent-decoded, if it is non-empty.
pub(crate) fn url_file_name(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    Some(decoded)
}

/// Derives a local name for a fetched body.
///
/// Order: `Content-Disposition`, then the URL's file name, then `fallback`.
/// A URL name or fallback without an extension gets one from `content_type`.
pub(crate) fn derive_filename(
    disposition: Option<&str>,
    url: &Url,
    content_type: Option<&str>,
    fallback: &str,
) -> String {
    if let Some(name) = disposition.filter(|name| !name.trim().is_empty()) {
        return sanitize_filename(name.trim());
    }
    let name = url_file_name(url).unwrap_or_else(|| fallback.to_string());
    let has_extension = Path::new(&name)
        .extension()
        .is_some_and(|ext| !ext.is_empty());
    if has_extension {
        return sanitize_filename(&name);
    }
    let extension = content_type
        .and_then(extension_from_content_type)
        .unwrap_or_default();
    sanitize_filename(&format!("{name}{extension}"))
}

/// Resolves the target for `filename` in `dir`.
///
/// An existing file is replaced when `overwrite` is set; otherwise the Unix
/// time is appended to the stem (`report_1760000000.pdf`), then a counter if
/// that is taken too.
pub(crate) fn collision_safe_path(dir: &Path, filename: &str, overwrite: bool) -> PathBuf {
    let filename = sanitize_filename(filename);
    let base_path = dir.join(&filename);
    if overwrite || !base_path.exists() {
        return base_path;
    }
    dir.join(stamped_name(&filename, unix_now(), |candidate| {
        dir.join(candidate).exists()
    }))
}

/// Appends `_<timestamp>` to the stem of `filename`, adding `_<n>` while
/// `taken` reports a clash.
pub(crate) fn stamped_name(filename: &str, timestamp: i64, taken: impl Fn(&str) -> bool) -> String {
    let (stem, ext) = split_extension(filename);
    let candidate = format!("{stem}_{timestamp}{ext}");
    if !taken(&candidate) {
        return candidate;
    }
    for i in 1..1000 {
        let candidate = format!("{stem}_{timestamp}_{i}{ext}");
        if !taken(&candidate) {
            return candidate;
        }
    }
    candidate
}

fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(pos) if pos > 0 => (&filename[..pos], &filename[pos..]),
        _ => (filename, ""),
    }
}
