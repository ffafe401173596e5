//! Redirect-aware capture of response header lines.
//!
//! The transport delivers every raw header line it receives, including the
//! blank line that terminates each response's header block. A redirect chain
//! therefore arrives as `[headers-A, blank, headers-B, blank, ...]`, and the
//! capture turns it into one [`Hop`] per response:
//!
//! - the first non-blank line opens hop 0, however many blank lines came first
//! - a blank line closes the current hop; the next non-blank line opens a new one
//! - `Set-Cookie` values go to the [`CookieStore`]; live cookies are mirrored
//!   into the hop's cookie map
//! - every other `name: value` pair becomes a hop variable, plus a
//!   `name:ip` entry when the value embeds valid IPv4 addresses

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tracing::trace;
use url::Url;

use crate::cookies::CookieStore;
use crate::transport::HeaderSink;

#[allow(clippy::expect_used)]
static DOTTED_QUAD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").expect("dotted quad regex is valid") // Static pattern, safe to panic
});

/// Suffix of the auxiliary variable holding addresses found in a header value.
pub const IP_VAR_SUFFIX: &str = ":ip";

/// A captured header variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderVar {
    /// Trimmed header value.
    Text(String),
    /// IPv4 addresses extracted from a header value.
    Addresses(Vec<Ipv4Addr>),
}

impl HeaderVar {
    /// Returns the text value, if this is a plain header variable.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Addresses(_) => None,
        }
    }
}

/// Header bookkeeping for one response in a redirect chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Hop {
    /// Trimmed raw header lines in arrival order, blank separators excluded.
    pub lines: Vec<String>,
    /// Lower-cased header name to value; later duplicates overwrite.
    pub vars: BTreeMap<String, HeaderVar>,
    /// Cookies set during this hop that were alive on arrival.
    pub cookies: BTreeMap<String, String>,
}

impl Hop {
    /// Looks up a plain header variable by lower-cased name.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(HeaderVar::as_text)
    }

    /// Returns the status line (`HTTP/1.1 302 Found`) when present.
    #[must_use]
    pub fn status_line(&self) -> Option<&str> {
        self.lines
            .first()
            .map(String::as_str)
            .filter(|line| line.starts_with("HTTP/"))
    }
}

/// State machine turning header-line events into hops.
#[derive(Debug, Clone, Default)]
pub struct HeaderCapture {
    hops: Vec<Hop>,
    at_boundary: bool,
}

impl HeaderCapture {
    /// Creates an empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards all hops, ready for the next request.
    pub fn reset(&mut self) {
        self.hops.clear();
        self.at_boundary = false;
    }

    /// Captured hops, index 0 being the first response.
    #[must_use]
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    /// Index of the hop receiving lines, `None` before the first line.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        self.hops.len().checked_sub(1)
    }

    /// Feeds one raw header line received from `effective_url`.
    pub fn record_line(&mut self, raw: &str, effective_url: &Url, cookies: &mut CookieStore) {
        let line = raw.trim();
        if line.is_empty() {
            if !self.hops.is_empty() {
                self.at_boundary = true;
            }
            return;
        }

        if self.hops.is_empty() || self.at_boundary {
            self.hops.push(Hop::default());
            self.at_boundary = false;
            trace!(hop = self.hops.len() - 1, "opened hop");
        }
        let Some(hop) = self.hops.last_mut() else {
            return;
        };
        hop.lines.push(line.to_string());

        let Some((name, value)) = raw.split_once(':') else {
            return;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim();
        if name.is_empty() {
            return;
        }

        if name == "set-cookie" {
            if let Some((cookie_name, cookie_value)) = cookies.set_cookie(value, effective_url) {
                hop.cookies.insert(cookie_name, cookie_value);
            }
            return;
        }

        let addresses = extract_ipv4(value);
        if !addresses.is_empty() {
            hop.vars.insert(
                format!("{name}{IP_VAR_SUFFIX}"),
                HeaderVar::Addresses(addresses),
            );
        }
        hop.vars.insert(name, HeaderVar::Text(value.to_string()));
    }
}

/// Adapter feeding transport header events into a capture and cookie store.
pub struct CaptureSink<'a> {
    capture: &'a mut HeaderCapture,
    cookies: &'a mut CookieStore,
}

impl<'a> CaptureSink<'a> {
    /// Borrows the capture and store for the duration of one transport call.
    pub fn new(capture: &'a mut HeaderCapture, cookies: &'a mut CookieStore) -> Self {
        Self { capture, cookies }
    }
}

impl HeaderSink for CaptureSink<'_> {
    fn header_line(&mut self, line: &str, effective_url: &Url) {
        self.capture.record_line(line, effective_url, self.cookies);
    }
}

/// Extracts valid IPv4 addresses embedded in a string.
///
/// A candidate must not touch other digits on either side, and each octet
/// must be in range, so `"300.1.1.1"` is rejected while `"10.0.0.20:80"`
/// yields `10.0.0.20`.
#[must_use]
pub fn extract_ipv4(value: &str) -> Vec<Ipv4Addr> {
    DOTTED_QUAD
        .find_iter(value)
        .filter(|candidate| {
            let before = value[..candidate.start()].chars().next_back();
            let after = value[candidate.end()..].chars().next();
            !before.is_some_and(|c| c.is_ascii_digit()) && !after.is_some_and(|c| c.is_ascii_digit())
        })
        .filter_map(|candidate| candidate.as_str().parse::<Ipv4Addr>().ok())
        .collect()
}
