//! Attribute-aware store for cookies received in `Set-Cookie` headers.
//!
//! The store mirrors every cookie the server hands out, whether or not the
//! transport is configured to send cookies back. Entries are keyed by
//! `scheme://domain/path/name`, where the scheme is implied by the `Secure`
//! flag. Expired entries are only purged when the store is enumerated.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, trace};
use url::Url;

/// Lifetime given to cookies that carry neither `Expires` nor `Max-Age`.
pub const SESSION_COOKIE_LIFETIME_SECS: i64 = 900;

/// A cookie as recorded by the store.
///
/// The value is redacted in Debug output to prevent accidental logging of
/// session tokens.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive, never log).
    value: String,
    /// Absolute expiry as unix seconds.
    pub expires: i64,
    /// Domain without leading or trailing dots.
    pub domain: String,
    /// Path, always beginning and ending with `/`.
    pub path: String,
    /// True when the server gave no `Domain` attribute.
    pub host_only: bool,
    /// `Secure` flag.
    pub secure: bool,
    /// `HttpOnly` flag.
    pub http_only: bool,
    /// True when the server gave no explicit lifetime.
    pub session_only: bool,
}

impl Cookie {
    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive; avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Composite identity used for upserts.
    #[must_use]
    pub fn store_key(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}{}{}", self.domain, self.path, self.name)
    }

    /// Returns true once the expiry is not after `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires <= now
    }
}

impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("expires", &self.expires)
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("host_only", &self.host_only)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("session_only", &self.session_only)
            .finish()
    }
}

/// Cookie records keyed by their composite identity.
#[derive(Debug, Default, Clone)]
pub struct CookieStore {
    entries: BTreeMap<String, Cookie>,
}

impl CookieStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a raw `Set-Cookie` header value received from `effective_url`.
    ///
    /// Returns the `(name, value)` pair to record in the active hop's cookie
    /// log when the cookie is still alive, `None` when it was expired on
    /// arrival or the header had no usable identity.
    pub fn set_cookie(&mut self, header: &str, effective_url: &Url) -> Option<(String, String)> {
        self.set_cookie_at(header, effective_url, unix_now())
    }

    /// Same as [`set_cookie`](Self::set_cookie) with an explicit clock.
    pub fn set_cookie_at(
        &mut self,
        header: &str,
        effective_url: &Url,
        now: i64,
    ) -> Option<(String, String)> {
        let Some(cookie) = parse_set_cookie(header, effective_url, now) else {
            debug!("ignoring Set-Cookie header without a name=value identity");
            return None;
        };

        let logged = (!cookie.is_expired_at(now)).then(|| (cookie.name.clone(), cookie.value.clone()));

        match self.entries.entry(cookie.store_key()) {
            Entry::Occupied(mut slot) => {
                let existing = slot.get_mut();
                existing.value = cookie.value;
                existing.expires = cookie.expires;
                trace!(key = %slot.key(), "updated cookie");
            }
            Entry::Vacant(slot) => {
                trace!(key = %slot.key(), "inserted cookie");
                slot.insert(cookie);
            }
        }

        logged
    }

    /// Purges expired entries and returns every remaining cookie.
    pub fn snapshot(&mut self) -> Vec<Cookie> {
        self.snapshot_at(unix_now())
    }

    /// Same as [`snapshot`](Self::snapshot) with an explicit clock.
    pub fn snapshot_at(&mut self, now: i64) -> Vec<Cookie> {
        let before = self.entries.len();
        self.entries.retain(|_, cookie| !cookie.is_expired_at(now));
        let purged = before - self.entries.len();
        if purged > 0 {
            debug!(purged, "purged expired cookies");
        }
        self.entries.values().cloned().collect()
    }

    /// Number of stored entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Parses a `Set-Cookie` value into a normalized cookie.
///
/// The first `;` segment must be `name=value`. Later segments are attributes
/// (case-insensitive); `Secure` and `HttpOnly` count as set whenever present.
fn parse_set_cookie(header: &str, effective_url: &Url, now: i64) -> Option<Cookie> {
    let mut segments = header.split(';');
    let (name, value) = segments.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut expires_attr = None;
    let mut max_age_attr = None;
    let mut domain_attr = "";
    let mut path_attr = "";
    let mut secure = false;
    let mut http_only = false;

    for segment in segments {
        let (key, attr_value) = match segment.split_once('=') {
            Some((key, attr_value)) => (key.trim(), attr_value.trim()),
            None => (segment.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "expires" if !attr_value.is_empty() => expires_attr = Some(attr_value),
            "max-age" if !attr_value.is_empty() => max_age_attr = Some(attr_value),
            "domain" => domain_attr = attr_value,
            "path" => path_attr = attr_value,
            "secure" => secure = true,
            "httponly" => http_only = true,
            _ => {}
        }
    }

    let explicit_expiry = expires_attr.and_then(parse_cookie_date).or_else(|| {
        max_age_attr
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(|seconds| now.saturating_add(seconds))
    });
    let (expires, session_only) = match explicit_expiry {
        Some(expires) => (expires, false),
        None => (now + SESSION_COOKIE_LIFETIME_SECS, true),
    };

    let domain = domain_attr.trim_matches('.').to_ascii_lowercase();
    let (domain, host_only) = if domain.is_empty() {
        (effective_url.host_str().unwrap_or_default().to_string(), true)
    } else {
        (domain, false)
    };

    let path = path_attr.trim_matches('/');
    let path = if path.is_empty() {
        "/".to_string()
    } else {
        format!("/{path}/")
    };

    Some(Cookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        expires,
        domain,
        path,
        host_only,
        secure,
        http_only,
        session_only,
    })
}

/// Parses an `Expires` attribute as unix seconds.
///
/// Accepts the HTTP-date forms plus the dashed `21-Oct-2026` day-month
/// spelling many servers still send.
fn parse_cookie_date(raw: &str) -> Option<i64> {
    let parsed = httpdate::parse_http_date(raw)
        .or_else(|_| httpdate::parse_http_date(&raw.replace('-', " ")))
        .ok()?;
    Some(system_time_to_unix(parsed))
}

fn system_time_to_unix(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

/// Current wall clock as unix seconds.
pub(crate) fn unix_now() -> i64 {
    system_time_to_unix(SystemTime::now())
}
