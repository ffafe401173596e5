//! Typed session configuration.
//!
//! [`SessionConfig`] replaces free-form engine options with named fields.
//! Callers change it through [`Setting`] values; protocol restriction and
//! header capture are fixed by the session and refused with
//! [`ConfigWarning::Locked`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::user_agent;

/// Default maximum redirects followed per call.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;
/// Upper bound accepted for `max_redirects`.
pub const MAX_REDIRECTS_LIMIT: u32 = 50;
/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;
/// Default total timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 45;
/// Connect timeout applied while a transfer helper runs.
pub const TRANSFER_CONNECT_TIMEOUT_SECS: u64 = 30;
/// Total timeout applied while a transfer helper runs.
pub const TRANSFER_TIMEOUT_SECS: u64 = 600;
/// Smallest accepted timeout.
const MIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Largest accepted timeout.
const MAX_TIMEOUT: Duration = Duration::from_secs(3600);

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Verify TLS certificates and host names.
    pub verify_tls: bool,
    /// Advertise and decode compressed encodings.
    pub compression: bool,
    /// Follow `Location` redirects.
    pub follow_location: bool,
    /// Redirect limit per call.
    pub max_redirects: u32,
    /// Send the previous URL as `Referer` when following a redirect.
    pub auto_referer: bool,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Whole-call timeout.
    pub timeout: Duration,
    /// `Referer` for the next call only; cleared after every call.
    pub referer: Option<String>,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Issue `HEAD` instead of `GET` for bodiless calls.
    pub nobody: bool,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Netscape cookie file read when set.
    pub cookie_file: Option<PathBuf>,
    /// Netscape cookie file written on close.
    pub cookie_jar: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            verify_tls: true,
            compression: true,
            follow_location: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            auto_referer: true,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            referer: None,
            user_agent: user_agent::default_session_user_agent(),
            nobody: false,
            headers: Vec::new(),
            cookie_file: None,
            cookie_jar: None,
        }
    }
}

impl SessionConfig {
    /// Clamps out-of-range values, returning one warning per correction.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.max_redirects > MAX_REDIRECTS_LIMIT {
            warnings.push(ConfigWarning::out_of_range(
                SettingKey::MaxRedirects,
                self.max_redirects.to_string(),
                "0..=50",
            ));
            self.max_redirects = MAX_REDIRECTS_LIMIT;
        }
        for (key, value) in [
            (SettingKey::ConnectTimeout, &mut self.connect_timeout),
            (SettingKey::Timeout, &mut self.timeout),
        ] {
            if *value < MIN_TIMEOUT || *value > MAX_TIMEOUT {
                warnings.push(ConfigWarning::out_of_range(
                    key,
                    format!("{}s", value.as_secs()),
                    "1s..=3600s",
                ));
                *value = (*value).clamp(MIN_TIMEOUT, MAX_TIMEOUT);
            }
        }
        if self.user_agent.trim().is_empty() {
            warnings.push(ConfigWarning::out_of_range(
                SettingKey::UserAgent,
                String::new(),
                "a non-empty string",
            ));
            self.user_agent = user_agent::default_session_user_agent();
        }
        let before = self.headers.len();
        self.headers
            .retain(|(name, _)| !name.trim().is_empty() && !name.contains([':', '\r', '\n']));
        if self.headers.len() != before {
            warnings.push(ConfigWarning::out_of_range(
                SettingKey::Headers,
                format!("{} malformed", before - self.headers.len()),
                "header names without ':' or line breaks",
            ));
        }

        warnings
    }

    /// Applies one setting. Cookie file paths are recorded as given; sessions
    /// validate and activate them before calling this.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigWarning::Locked`] for settings callers may not change.
    pub fn apply(&mut self, setting: Setting) -> Result<(), ConfigWarning> {
        match setting {
            Setting::VerifyTls(value) => self.verify_tls = value,
            Setting::Compression(value) => self.compression = value,
            Setting::FollowLocation(value) => self.follow_location = value,
            Setting::MaxRedirects(value) => self.max_redirects = value,
            Setting::AutoReferer(value) => self.auto_referer = value,
            Setting::ConnectTimeout(value) => self.connect_timeout = value,
            Setting::Timeout(value) => self.timeout = value,
            Setting::Referer(value) => self.referer = value,
            Setting::UserAgent(value) => self.user_agent = value,
            Setting::NoBody(value) => self.nobody = value,
            Setting::Headers(value) => self.headers = value,
            Setting::CookieFile(path) => self.cookie_file = Some(path),
            Setting::CookieJar(path) => self.cookie_jar = Some(path),
            locked @ (Setting::Protocols(_) | Setting::CaptureHeaders(_)) => {
                return Err(ConfigWarning::Locked { key: locked.key() });
            }
        }
        Ok(())
    }

    /// Switches to transfer-helper timeouts.
    pub(crate) fn use_transfer_timeouts(&mut self) {
        self.connect_timeout = Duration::from_secs(TRANSFER_CONNECT_TIMEOUT_SECS);
        self.timeout = Duration::from_secs(TRANSFER_TIMEOUT_SECS);
    }
}

/// One configuration change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Setting {
    /// See [`SessionConfig::verify_tls`].
    VerifyTls(bool),
    /// See [`SessionConfig::compression`].
    Compression(bool),
    /// See [`SessionConfig::follow_location`].
    FollowLocation(bool),
    /// See [`SessionConfig::max_redirects`].
    MaxRedirects(u32),
    /// See [`SessionConfig::auto_referer`].
    AutoReferer(bool),
    /// See [`SessionConfig::connect_timeout`].
    ConnectTimeout(Duration),
    /// See [`SessionConfig::timeout`].
    Timeout(Duration),
    /// See [`SessionConfig::referer`].
    Referer(Option<String>),
    /// See [`SessionConfig::user_agent`].
    UserAgent(String),
    /// See [`SessionConfig::nobody`].
    NoBody(bool),
    /// See [`SessionConfig::headers`].
    Headers(Vec<(String, String)>),
    /// Activates file-backed cookies read from this path.
    CookieFile(PathBuf),
    /// Activates file-backed cookies written to this path on close.
    CookieJar(PathBuf),
    /// Allowed protocols. Locked.
    Protocols(Vec<String>),
    /// Header capture. Locked.
    CaptureHeaders(bool),
}

impl Setting {
    /// Identifies the setting.
    #[must_use]
    pub fn key(&self) -> SettingKey {
        match self {
            Self::VerifyTls(_) => SettingKey::VerifyTls,
            Self::Compression(_) => SettingKey::Compression,
            Self::FollowLocation(_) => SettingKey::FollowLocation,
            Self::MaxRedirects(_) => SettingKey::MaxRedirects,
            Self::AutoReferer(_) => SettingKey::AutoReferer,
            Self::ConnectTimeout(_) => SettingKey::ConnectTimeout,
            Self::Timeout(_) => SettingKey::Timeout,
            Self::Referer(_) => SettingKey::Referer,
            Self::UserAgent(_) => SettingKey::UserAgent,
            Self::NoBody(_) => SettingKey::NoBody,
            Self::Headers(_) => SettingKey::Headers,
            Self::CookieFile(_) => SettingKey::CookieFile,
            Self::CookieJar(_) => SettingKey::CookieJar,
            Self::Protocols(_) => SettingKey::Protocols,
            Self::CaptureHeaders(_) => SettingKey::CaptureHeaders,
        }
    }
}

/// Setting identifiers, used in warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    VerifyTls,
    Compression,
    FollowLocation,
    MaxRedirects,
    AutoReferer,
    ConnectTimeout,
    Timeout,
    Referer,
    UserAgent,
    NoBody,
    Headers,
    CookieFile,
    CookieJar,
    Protocols,
    CaptureHeaders,
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VerifyTls => "verify_tls",
            Self::Compression => "compression",
            Self::FollowLocation => "follow_location",
            Self::MaxRedirects => "max_redirects",
            Self::AutoReferer => "auto_referer",
            Self::ConnectTimeout => "connect_timeout",
            Self::Timeout => "timeout",
            Self::Referer => "referer",
            Self::UserAgent => "user_agent",
            Self::NoBody => "nobody",
            Self::Headers => "headers",
            Self::CookieFile => "cookie_file",
            Self::CookieJar => "cookie_jar",
            Self::Protocols => "protocols",
            Self::CaptureHeaders => "capture_headers",
        };
        f.write_str(name)
    }
}

/// Non-fatal configuration problems. The offending change is skipped or
/// clamped and the session keeps working.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigWarning {
    /// The setting is fixed by the session.
    #[error("setting '{key}' is locked and cannot be changed")]
    Locked {
        /// Refused setting.
        key: SettingKey,
    },

    /// A value was outside its accepted range and was corrected.
    #[error("setting '{key}' value '{value}' out of range, expected {expected}")]
    OutOfRange {
        /// Corrected setting.
        key: SettingKey,
        /// Rejected value.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },

    /// A cookie file path was already set for this session.
    #[error("setting '{key}' is already set for this session")]
    AlreadySet {
        /// Refused setting.
        key: SettingKey,
    },

    /// A cookie file path cannot be used.
    #[error("cookie file {path} is unusable: {reason}")]
    CookieFileUnusable {
        /// Rejected path.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// Session cookies cannot be toggled while file-backed cookies are active.
    #[error("session cookies are unavailable while file-backed cookies are active")]
    FileCookiesActive,

    /// The transport rejected the new configuration; the previous one stays.
    #[error("transport rejected configuration: {reason}")]
    TransportRejected {
        /// Engine error message.
        reason: String,
    },
}

impl ConfigWarning {
    fn out_of_range(key: SettingKey, value: String, expected: &'static str) -> Self {
        Self::OutOfRange {
            key,
            value,
            expected,
        }
    }
}
