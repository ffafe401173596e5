//! Netscape cookie file support for file-backed cookie handling.
//!
//! Reads the Netscape HTTP cookie file format (7 TAB-separated fields per line)
//! into a `reqwest::cookie::Jar` so the transport can send them, and writes
//! the session's cookies back out in the same format when the session closes.

use std::fmt;
use std::io::{BufRead, Write};

use reqwest::cookie::Jar;
use tracing::{debug, instrument, warn};

use super::store::Cookie;

/// Prefix curl uses to mark `HttpOnly` cookies in an otherwise commented line.
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// A single cookie line from a Netscape-format cookie file.
///
/// The value field is redacted in Debug output to prevent accidental
/// logging of sensitive cookie data.
#[derive(Clone)]
pub struct CookieLine {
    /// The domain the cookie belongs to (e.g., `.example.com`).
    pub domain: String,
    /// Whether subdomains should match.
    pub tailmatch: bool,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Whether the line carried curl's `#HttpOnly_` marker.
    pub http_only: bool,
    /// Unix timestamp for expiry (0 = session cookie).
    pub expires: u64,
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, never log).
    value: String,
}

impl CookieLine {
    /// Creates a new cookie entry.
    #[must_use]
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn new(
        domain: String,
        tailmatch: bool,
        path: String,
        secure: bool,
        http_only: bool,
        expires: u64,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain,
            tailmatch,
            path,
            secure,
            http_only,
            expires,
            name,
            value,
        }
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive; avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Identity used to merge file cookies with store cookies on write.
    pub(crate) fn identity(&self) -> (String, String, String, bool) {
        (
            self.domain.trim_start_matches('.').to_ascii_lowercase(),
            self.path.clone(),
            self.name.clone(),
            self.secure,
        )
    }
}

impl From<&Cookie> for CookieLine {
    fn from(cookie: &Cookie) -> Self {
        let domain = if cookie.host_only {
            cookie.domain.clone()
        } else {
            format!(".{}", cookie.domain)
        };
        let expires = if cookie.session_only {
            0
        } else {
            u64::try_from(cookie.expires).unwrap_or(0)
        };
        Self {
            domain,
            tailmatch: !cookie.host_only,
            path: cookie.path.clone(),
            secure: cookie.secure,
            http_only: cookie.http_only,
            expires,
            name: cookie.name.clone(),
            value: cookie.value().to_string(),
        }
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors that can occur while reading or writing a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieFileError {
    /// A line in the cookie file has an invalid format.
    #[error("line {line_number}: {reason} (got: {content})")]
    InvalidLine {
        /// 1-based line number in the cookie file.
        line_number: usize,
        /// The offending line content (truncated, with value redacted).
        content: String,
        /// Description of what was wrong.
        reason: String,
    },

    /// I/O error reading or writing the cookie file.
    #[error("cookie file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of parsing a cookie file, including successfully parsed cookies
/// and any warnings about malformed lines.
#[derive(Debug, Default)]
pub struct ParseResult {
    /// Successfully parsed cookies.
    pub cookies: Vec<CookieLine>,
    /// Warnings for malformed lines (line number and reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file from a buffered reader.
///
/// Each non-comment, non-blank line must contain exactly 7 TAB-separated fields:
/// `domain`, `tailmatch`, `path`, `secure`, `expires`, `name`, `value`.
/// Lines prefixed with `#HttpOnly_` are cookie lines; other `#` lines are
/// comments. Malformed lines are collected as warnings, so an empty or
/// freshly created file parses to an empty result.
///
/// # Errors
///
/// Returns [`CookieFileError::Io`] on read failure.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<ParseResult, CookieFileError> {
    let mut result = ParseResult::default();

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        // Handle CRLF: strip trailing \r
        let line = line.trim_end();

        if line.is_empty() {
            continue;
        }

        let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
            Some(rest) => (rest, true),
            None if line.starts_with('#') => continue,
            None => (line, false),
        };

        match parse_cookie_line(line, line_number, http_only) {
            Ok(cookie) => {
                debug!(
                    line = line_number,
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "parsed cookie"
                );
                result.cookies.push(cookie);
            }
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                result.warnings.push((line_number, e.to_string()));
            }
        }
    }

    Ok(result)
}

/// Parses a single cookie line into a `CookieLine`.
fn parse_cookie_line(
    line: &str,
    line_number: usize,
    http_only: bool,
) -> Result<CookieLine, CookieFileError> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() != 7 {
        return Err(CookieFileError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: format!("expected 7 TAB-separated fields, found {}", fields.len()),
        });
    }

    let domain = fields[0].to_string();
    let tailmatch = parse_bool_field(fields[1], "tailmatch", line_number, line)?;
    let path = fields[2].to_string();
    let secure = parse_bool_field(fields[3], "secure", line_number, line)?;

    let expires = fields[4]
        .parse::<u64>()
        .map_err(|_| CookieFileError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: format!(
                "expires field must be a non-negative integer, got '{}'",
                fields[4]
            ),
        })?;

    let name = fields[5].to_string();
    let value = fields[6].to_string();

    if domain.is_empty() {
        return Err(CookieFileError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: "domain field is empty".to_string(),
        });
    }

    if name.is_empty() {
        return Err(CookieFileError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: "cookie name field is empty".to_string(),
        });
    }

    Ok(CookieLine::new(
        domain, tailmatch, path, secure, http_only, expires, name, value,
    ))
}

/// Parses a `TRUE`/`FALSE` string field.
fn parse_bool_field(
    value: &str,
    field_name: &str,
    line_number: usize,
    line: &str,
) -> Result<bool, CookieFileError> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(CookieFileError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: format!("{field_name} field must be TRUE or FALSE, got '{value}'"),
        }),
    }
}

/// Redacts cookie value (7th field) from a line for safe error messages.
fn redact_line_for_error(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 7 {
        let mut redacted = fields[..6].join("\t");
        redacted.push_str("\t[REDACTED]");
        redacted
    } else {
        line.to_string()
    }
}

/// Writes cookies in Netscape format, header line included.
///
/// # Errors
///
/// Returns [`CookieFileError::Io`] when the writer fails.
pub fn write_netscape_cookies(
    mut writer: impl Write,
    cookies: &[CookieLine],
) -> Result<(), CookieFileError> {
    writeln!(writer, "# Netscape HTTP Cookie File")?;
    writeln!(writer, "# Written by lazyfetch. Edit at your own risk.")?;
    writeln!(writer)?;
    for cookie in cookies {
        let marker = if cookie.http_only { HTTP_ONLY_PREFIX } else { "" };
        writeln!(
            writer,
            "{marker}{}\t{}\t{}\t{}\t{}\t{}\t{}",
            cookie.domain,
            bool_field(cookie.tailmatch),
            cookie.path,
            bool_field(cookie.secure),
            cookie.expires,
            cookie.name,
            cookie.value()
        )?;
    }
    writer.flush()?;
    Ok(())
}

fn bool_field(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

/// Adds parsed cookies to an existing jar.
///
/// Each `CookieLine` is converted to a `Set-Cookie` header string and added
/// with the appropriate origin URL for domain matching.
pub fn add_cookies_to_jar(jar: &Jar, cookies: &[CookieLine]) {
    for cookie in cookies {
        let set_cookie = build_set_cookie_string(cookie);
        let origin_url = build_origin_url(cookie);

        if let Ok(url) = origin_url.parse::<url::Url>() {
            jar.add_cookie_str(&set_cookie, &url);
            debug!(
                domain = %cookie.domain,
                name = %cookie.name,
                "loaded cookie into jar"
            );
        } else {
            warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                "skipping cookie with unparseable domain"
            );
        }
    }
}

/// Builds a `Set-Cookie` header string from a `CookieLine`.
fn build_set_cookie_string(cookie: &CookieLine) -> String {
    let mut parts = vec![format!("{}={}", cookie.name, cookie.value())];

    // Host-only cookies must not carry a Domain attribute.
    if cookie.tailmatch {
        parts.push(format!("Domain={}", cookie.domain));
    }
    parts.push(format!("Path={}", cookie.path));

    if cookie.secure {
        parts.push("Secure".to_string());
    }
    if cookie.http_only {
        parts.push("HttpOnly".to_string());
    }

    // Expires (0 = session cookie, omit Expires)
    if cookie.expires > 0 {
        if let Some(expires_str) = unix_to_http_date(cookie.expires) {
            parts.push(format!("Expires={expires_str}"));
        } else {
            warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                expires = cookie.expires,
                "cookie expiry timestamp overflows SystemTime; treating as session cookie"
            );
        }
    }

    parts.join("; ")
}

/// Builds the origin URL for `Jar::add_cookie_str` from a `CookieLine`.
///
/// Uses `https://` for secure cookies and `http://` for non-secure.
fn build_origin_url(cookie: &CookieLine) -> String {
    let scheme = if cookie.secure { "https" } else { "http" };
    let domain = cookie.domain.strip_prefix('.').unwrap_or(&cookie.domain);
    format!("{scheme}://{domain}{}", cookie.path)
}

/// Converts a Unix timestamp to an HTTP-date string (RFC 7231).
fn unix_to_http_date(timestamp: u64) -> Option<String> {
    use std::time::{Duration, UNIX_EPOCH};

    let time = UNIX_EPOCH.checked_add(Duration::from_secs(timestamp))?;
    Some(httpdate::fmt_http_date(time))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cookies::CookieStore;
    use reqwest::cookie::CookieStore as _;
    use std::io::Cursor;

    fn cursor(s: &str) -> Cursor<&[u8]> {
        Cursor::new(s.as_bytes())
    }

    fn line(domain: &str, tailmatch: bool, path: &str, secure: bool, name: &str) -> CookieLine {
        CookieLine::new(
            domain.to_string(),
            tailmatch,
            path.to_string(),
            secure,
            false,
            0,
            name.to_string(),
            "value".to_string(),
        )
    }

    #[test]
    fn test_parse_netscape_cookies_valid_file() {
        let input = "\
# Netscape HTTP Cookie File
.example.com\tTRUE\t/\tFALSE\t0\tsession\tabc123
.other.com\tTRUE\t/path\tTRUE\t1700000000\ttoken\txyz789
";
        let result = parse_netscape_cookies(cursor(input)).unwrap();
        assert_eq!(result.cookies.len(), 2);
        assert!(result.warnings.is_empty());
        assert_eq!(result.cookies[0].domain, ".example.com");
        assert_eq!(result.cookies[0].value(), "abc123");
        assert!(result.cookies[1].secure);
        assert_eq!(result.cookies[1].expires, 1_700_000_000);
    }

    #[test]
    fn test_parse_http_only_marker_is_a_cookie_line() {
        let input = "#HttpOnly_.example.com\tTRUE\t/\tFALSE\t0\tsid\tabc\n# comment\n";
        let result = parse_netscape_cookies(cursor(input)).unwrap();
        assert_eq!(result.cookies.len(), 1);
        assert!(result.cookies[0].http_only);
        assert_eq!(result.cookies[0].domain, ".example.com");
    }

    #[test]
    fn test_parse_empty_file_is_ok() {
        let result = parse_netscape_cookies(cursor("")).unwrap();
        assert!(result.cookies.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_parse_malformed_lines_become_warnings() {
        let input = "\
.good.com\tTRUE\t/\tFALSE\t0\tname\tvalue
bad line without tabs
.example.com\tYES\t/\tFALSE\t0\tname\tvalue
";
        let result = parse_netscape_cookies(cursor(input)).unwrap();
        assert_eq!(result.cookies.len(), 1);
        assert_eq!(result.warnings.len(), 2);
        assert_eq!(result.warnings[0].0, 2);
        assert!(result.warnings[0].1.contains("expected 7 TAB-separated fields"));
    }

    #[test]
    fn test_parse_crlf_line_endings() {
        let input = "# Header\r\n.example.com\tTRUE\t/\tFALSE\t0\tname\tvalue\r\n";
        let result = parse_netscape_cookies(cursor(input)).unwrap();
        assert_eq!(result.cookies[0].value(), "value");
    }

    #[test]
    fn test_redact_line_for_error_hides_value() {
        let redacted = redact_line_for_error(".example.com\tTRUE\t/\tFALSE\t0\tname\tsecret_value");
        assert!(!redacted.contains("secret_value"));
        assert!(redacted.contains("[REDACTED]"));
    }

    #[test]
    fn test_cookie_line_debug_redacts_value() {
        let mut cookie = line(".example.com", true, "/", false, "session");
        cookie.value = "super_secret_token".to_string();
        let debug_str = format!("{cookie:?}");
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super_secret_token"));
    }

    #[test]
    fn test_write_then_parse_preserves_lines() {
        let cookies = vec![
            line(".example.com", true, "/", false, "a"),
            CookieLine::new(
                "host.test".to_string(),
                false,
                "/app/".to_string(),
                true,
                true,
                1_900_000_000,
                "b".to_string(),
                "v2".to_string(),
            ),
        ];
        let mut buffer = Vec::new();
        write_netscape_cookies(&mut buffer, &cookies).unwrap();
        let text = String::from_utf8(buffer.clone()).unwrap();
        assert!(text.starts_with("# Netscape HTTP Cookie File"));
        assert!(text.contains("#HttpOnly_host.test\tFALSE\t/app/\tTRUE\t1900000000\tb\tv2"));

        let parsed = parse_netscape_cookies(Cursor::new(buffer)).unwrap();
        assert_eq!(parsed.cookies.len(), 2);
        assert!(parsed.cookies[1].http_only);
        assert_eq!(parsed.cookies[1].value(), "v2");
    }

    #[test]
    fn test_from_store_cookie_marks_domain_cookies() {
        let mut store = CookieStore::new();
        let origin = url::Url::parse("https://www.example.com/").unwrap();
        store.set_cookie_at("a=1; Domain=example.com; Max-Age=60", &origin, 1_000);
        store.set_cookie_at("b=2", &origin, 1_000);
        let cookies = store.snapshot_at(1_000);

        let lines: Vec<CookieLine> = cookies.iter().map(CookieLine::from).collect();
        let a = lines.iter().find(|l| l.name == "a").unwrap();
        assert_eq!(a.domain, ".example.com");
        assert!(a.tailmatch);
        assert_eq!(a.expires, 1_060);
        let b = lines.iter().find(|l| l.name == "b").unwrap();
        assert_eq!(b.domain, "www.example.com");
        assert!(!b.tailmatch);
        assert_eq!(b.expires, 0, "session-only cookies are written as session cookies");
    }

    #[test]
    fn test_add_cookies_to_jar_subdomain_matching() {
        let jar = Jar::default();
        add_cookies_to_jar(&jar, &[line(".example.com", true, "/", false, "session")]);
        let url = "http://sub.example.com/page".parse::<url::Url>().unwrap();
        let header = jar.cookies(&url).unwrap();
        assert!(header.to_str().unwrap().contains("session=value"));
    }

    #[test]
    fn test_add_cookies_to_jar_no_cross_domain() {
        let jar = Jar::default();
        add_cookies_to_jar(&jar, &[line(".example.com", true, "/", false, "session")]);
        let url = "http://other.com/page".parse::<url::Url>().unwrap();
        assert!(jar.cookies(&url).is_none());
    }

    #[test]
    fn test_build_set_cookie_string_host_only_omits_domain() {
        let s = build_set_cookie_string(&line("exact.com", false, "/", true, "n"));
        assert!(!s.contains("Domain="));
        assert!(s.contains("Secure"));
        assert!(!s.contains("Expires"));
    }

    #[test]
    fn test_build_origin_url_secure() {
        assert_eq!(
            build_origin_url(&line(".secure.com", true, "/api", true, "n")),
            "https://secure.com/api"
        );
    }
}
