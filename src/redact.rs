//! Credential masking for anything that ends up in logs or return values.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// `scheme://userinfo@` inside arbitrary text.
#[allow(clippy::expect_used)]
static URL_USERINFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://)[^/\s@]+@").expect("userinfo regex is valid") // Static pattern, safe to panic
});

/// FTP `USER` / `PASS` command lines.
#[allow(clippy::expect_used)]
static FTP_LOGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^(USER|PASS) [^\r\n]*").expect("ftp login regex is valid") // Static pattern, safe to panic
});

/// Masks credentials in URLs and FTP login lines.
///
/// `ftp://bob:pw@host/` becomes `ftp://*:*@host/`; `PASS pw` becomes `PASS *`.
#[must_use]
pub fn mask_credentials(text: &str) -> String {
    let masked: Cow<'_, str> = URL_USERINFO.replace_all(text, "${1}*:*@");
    FTP_LOGIN.replace_all(&masked, "${1} *").into_owned()
}
