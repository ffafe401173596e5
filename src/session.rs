//! One client session: configuration, cookies, header capture and the last
//! response.
//!
//! Every [`Session::exec`] call resets the body, hops and log, sends one
//! request (the transport follows redirects), and leaves the outcome
//! available through accessors. Transport failures never surface as `Err`:
//! the engine's error text becomes the body and the status is `0`.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use reqwest::Method;
use reqwest::cookie::Jar;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::capture::{CaptureSink, HeaderCapture, HeaderVar, Hop};
use crate::config::{ConfigWarning, SessionConfig, Setting, SettingKey};
use crate::cookies::{
    Cookie, CookieFileError, CookieLine, CookieStore, add_cookies_to_jar, parse_netscape_cookies,
    unix_now, write_netscape_cookies,
};
use crate::form::{Fields, FormError, UploadResolver, urlencode};
use crate::paths::{is_writable, resolve_from_cwd};
use crate::redact::mask_credentials;
use crate::transport::{
    BodyTarget, RequestBody, ReqwestTransport, TransferInfo, Transport, TransportError,
    TransportRequest, TransportResponse,
};

/// Details of the last call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecLog {
    /// Address of the server that answered, else the resolved host name.
    pub host: Option<String>,
    /// `[utc:..][host:..][time:..][size:..k][speed:..k/s]`.
    pub summary: Option<String>,
    /// Request line and headers of the final request, credentials masked.
    pub request: Vec<String>,
    /// Raw header lines per hop.
    pub response: Vec<Vec<String>>,
    /// Cookies set per hop.
    #[serde(rename = "set-cookie")]
    pub set_cookie: Vec<BTreeMap<String, String>>,
    /// Transfer statistics.
    pub info: Option<TransferInfo>,
    /// Non-fatal problems met during the call.
    pub warnings: Vec<String>,
}

/// An HTTP client session.
pub struct Session {
    config: SessionConfig,
    transport: Box<dyn Transport>,
    jar: Option<Arc<Jar>>,
    send_cookies: bool,
    file_cookies: Vec<CookieLine>,
    cookies: CookieStore,
    capture: HeaderCapture,
    data: Vec<u8>,
    status: u16,
    effective_url: Option<Url>,
    content_type: Option<String>,
    log: ExecLog,
    config_warnings: Vec<ConfigWarning>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("send_cookies", &self.send_cookies)
            .field("cookies", &self.cookies.len())
            .field("hops", &self.capture.hops().len())
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates a session with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(SessionConfig::default())
    }

    /// Creates a session with `config`.
    ///
    /// Out-of-range values are clamped; the corrections are available from
    /// [`config_warnings`](Self::config_warnings).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the HTTP client cannot be built.
    pub fn with_config(config: SessionConfig) -> Result<Self, TransportError> {
        let transport = ReqwestTransport::new(&SessionConfig::default(), None)?;
        Self::with_transport(config, Box::new(transport))
    }

    /// Creates a session on a caller-supplied transport.
    ///
    /// # Errors
    ///
    /// Returns the transport's error if it rejects the configuration.
    pub fn with_transport(
        mut config: SessionConfig,
        transport: Box<dyn Transport>,
    ) -> Result<Self, TransportError> {
        let cookie_file = config.cookie_file.take();
        let cookie_jar = config.cookie_jar.take();
        let mut warnings = config.validate();

        let mut session = Self {
            config,
            transport,
            jar: None,
            send_cookies: false,
            file_cookies: Vec::new(),
            cookies: CookieStore::new(),
            capture: HeaderCapture::new(),
            data: Vec::new(),
            status: 0,
            effective_url: None,
            content_type: None,
            log: ExecLog::default(),
            config_warnings: Vec::new(),
        };
        if let Some(path) = cookie_file
            && let Err(warning) = session.set_cookie_file(&path)
        {
            warnings.push(warning);
        }
        if let Some(path) = cookie_jar
            && let Err(warning) = session.set_cookie_jar(&path)
        {
            warnings.push(warning);
        }
        session.reconfigure()?;

        for warning in &warnings {
            warn!(%warning, "configuration warning");
        }
        session.config_warnings = warnings;
        Ok(session)
    }

    /// Warnings produced while building the session.
    #[must_use]
    pub fn config_warnings(&self) -> &[ConfigWarning] {
        &self.config_warnings
    }

    /// Current configuration.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Applies settings in order, then revalidates.
    ///
    /// Refused or corrected settings are reported, never fatal.
    pub fn set_opt(&mut self, settings: impl IntoIterator<Item = Setting>) -> Vec<ConfigWarning> {
        let previous = self.config.clone();
        let mut warnings = Vec::new();
        for setting in settings {
            let result = match setting {
                Setting::CookieFile(path) => self.set_cookie_file(&path),
                Setting::CookieJar(path) => self.set_cookie_jar(&path),
                other => self.config.apply(other),
            };
            if let Err(warning) = result {
                warnings.push(warning);
            }
        }
        warnings.extend(self.config.validate());

        if let Err(error) = self.reconfigure() {
            self.config = SessionConfig {
                cookie_file: self.config.cookie_file.take(),
                cookie_jar: self.config.cookie_jar.take(),
                ..previous
            };
            if let Err(restore_error) = self.reconfigure() {
                warn!(error = %restore_error, "failed to restore previous transport configuration");
            }
            warnings.push(ConfigWarning::TransportRejected {
                reason: error.to_string(),
            });
        }

        for warning in &warnings {
            warn!(%warning, "configuration warning");
        }
        warnings
    }

    /// Enables or disables sending cookies back to servers.
    ///
    /// Disabling drops every cookie the engine holds. Cookies are always
    /// recorded in the [`CookieStore`] regardless.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigWarning::FileCookiesActive`] while a cookie file or jar is set.
    pub fn set_send_cookies(&mut self, enable: bool) -> Result<(), ConfigWarning> {
        if self.config.cookie_file.is_some() || self.config.cookie_jar.is_some() {
            warn!("session cookies unavailable while file-backed cookies are active");
            return Err(ConfigWarning::FileCookiesActive);
        }
        if enable == self.send_cookies {
            return Ok(());
        }
        self.send_cookies = enable;
        self.jar = enable.then(|| Arc::new(Jar::default()));
        debug!(enable, "session cookies toggled");
        self.reconfigure()
            .map_err(|error| ConfigWarning::TransportRejected {
                reason: error.to_string(),
            })
    }

    /// Whether cookies are sent back to servers.
    #[must_use]
    pub fn send_cookies(&self) -> bool {
        self.send_cookies || self.jar.is_some()
    }

    fn set_cookie_file(&mut self, path: &Path) -> Result<(), ConfigWarning> {
        if self.config.cookie_file.is_some() {
            return Err(ConfigWarning::AlreadySet {
                key: SettingKey::CookieFile,
            });
        }
        let resolved = checked_cookie_path(path)?;
        let unusable = |reason: String| ConfigWarning::CookieFileUnusable {
            path: resolved.clone(),
            reason,
        };
        if !resolved.exists() {
            File::create(&resolved).map_err(|e| unusable(e.to_string()))?;
        }
        let file = File::open(&resolved).map_err(|e| unusable(e.to_string()))?;
        let parsed =
            parse_netscape_cookies(BufReader::new(file)).map_err(|e| unusable(e.to_string()))?;
        for (line_number, reason) in &parsed.warnings {
            warn!(line_number, reason = %reason, path = %resolved.display(), "skipping malformed cookie line");
        }

        self.send_cookies = false;
        let jar = self.jar.get_or_insert_with(|| Arc::new(Jar::default()));
        add_cookies_to_jar(jar, &parsed.cookies);
        info!(cookies = parsed.cookies.len(), path = %resolved.display(), "loaded cookie file");
        self.file_cookies = parsed.cookies;
        self.config.cookie_file = Some(resolved);
        Ok(())
    }

    fn set_cookie_jar(&mut self, path: &Path) -> Result<(), ConfigWarning> {
        if self.config.cookie_jar.is_some() {
            return Err(ConfigWarning::AlreadySet {
                key: SettingKey::CookieJar,
            });
        }
        let resolved = checked_cookie_path(path)?;
        if !is_writable(&resolved) {
            return Err(ConfigWarning::CookieFileUnusable {
                path: resolved,
                reason: "not writable".to_string(),
            });
        }
        self.send_cookies = false;
        self.jar.get_or_insert_with(|| Arc::new(Jar::default()));
        debug!(path = %resolved.display(), "cookie jar set");
        self.config.cookie_jar = Some(resolved);
        Ok(())
    }

    fn reconfigure(&mut self) -> Result<(), TransportError> {
        self.transport.configure(&self.config, self.jar.clone())
    }

    /// Sends one request and records its outcome.
    ///
    /// `GET` ignores `fields` (and becomes `HEAD` when `nobody` is set). Other
    /// methods send the flattened fields urlencoded when `manifest` is empty,
    /// otherwise as `multipart/form-data` with manifest-listed `@` values
    /// resolved into file parts.
    #[instrument(skip(self, fields, manifest), fields(url = %mask_credentials(url), method = %method))]
    pub async fn exec(&mut self, url: &str, method: Method, fields: &Fields, manifest: &[String]) {
        self.begin();
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(error) => {
                let message = format!("invalid URL '{}': {error}", mask_credentials(url));
                warn!(%message, "request not sent");
                self.data = message.into_bytes();
                self.config.referer = None;
                return;
            }
        };

        let (method, body, resolution) = if method == Method::GET || method == Method::HEAD {
            let method = if self.config.nobody {
                Method::HEAD
            } else {
                method
            };
            (method, RequestBody::Empty, None)
        } else if manifest.is_empty() {
            (method, RequestBody::UrlEncoded(urlencode(&fields.flatten())), None)
        } else {
            let resolution = UploadResolver::new(self.transport.as_ref())
                .resolve(fields.flatten(), manifest)
                .await;
            let body = RequestBody::Multipart(resolution.multipart_fields());
            (method, body, Some(resolution))
        };

        let request = TransportRequest {
            url: parsed,
            method,
            body,
            referer: self.config.referer.take(),
            target: BodyTarget::Memory,
        };
        let outcome = self.run(request).await;

        if let Some(resolution) = resolution {
            self.log
                .warnings
                .extend(resolution.warnings.iter().map(ToString::to_string));
        }
        if let Err(error) = outcome {
            debug!(%error, "exec finished with transport error");
        }
    }

    /// [`exec`](Self::exec) with JSON field data.
    ///
    /// # Errors
    ///
    /// Returns [`FormError::NotAMapping`] when `fields` is not a JSON object.
    pub async fn exec_json(
        &mut self,
        url: &str,
        method: Method,
        fields: &serde_json::Value,
        manifest: &[String],
    ) -> Result<(), FormError> {
        let fields = Fields::from_json(fields)?;
        self.exec(url, method, &fields, manifest).await;
        Ok(())
    }

    fn begin(&mut self) {
        self.data.clear();
        self.capture.reset();
        self.log = ExecLog::default();
        self.status = 0;
        self.effective_url = None;
        self.content_type = None;
    }

    /// Runs one transport call, capturing headers and filling the log.
    pub(crate) async fn run(
        &mut self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let host_hint = request.url.host_str().map(str::to_string);
        let port_hint = request.url.port_or_known_default().unwrap_or(80);
        let mut sink = CaptureSink::new(&mut self.capture, &mut self.cookies);
        let result = self.transport.execute(request, &mut sink).await;

        self.log.response = self.capture.hops().iter().map(|hop| hop.lines.clone()).collect();
        self.log.set_cookie = self
            .capture
            .hops()
            .iter()
            .map(|hop| hop.cookies.clone())
            .collect();

        match result {
            Ok(mut response) => {
                self.data = std::mem::take(&mut response.body);
                self.status = response.status;
                self.effective_url = Some(response.effective_url.clone());
                self.content_type.clone_from(&response.content_type);

                let host = match response.info.primary_ip {
                    Some(ip) => ip.to_string(),
                    None => resolve_host(response.effective_url.host_str(), port_hint).await,
                };
                self.log.request = response
                    .request_lines
                    .iter()
                    .map(|line| mask_credentials(line))
                    .collect();
                self.log.summary = Some(format_summary(unix_now(), &host, &response.info));
                self.log.host = Some(host);
                self.log.info = Some(response.info.clone());
                debug!(status = response.status, hops = self.capture.hops().len(), "exec complete");
                Ok(response)
            }
            Err(error) => {
                let message = mask_credentials(&error.to_string());
                warn!(error = %message, "request failed");
                self.data = message.into_bytes();
                self.log.host = Some(resolve_host(host_hint.as_deref(), port_hint).await);
                Err(error)
            }
        }
    }

    /// Runs a transfer-helper call with transfer timeouts, restoring the
    /// session's configuration afterwards. The body buffer is left empty.
    pub(crate) async fn run_transfer(
        &mut self,
        mut request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.begin();
        request.referer = self.config.referer.take();
        let saved = self.config.clone();
        self.config.use_transfer_timeouts();

        let outcome = match self.reconfigure() {
            Ok(()) => self.run(request).await,
            Err(error) => Err(error),
        };

        self.config = saved;
        if let Err(error) = self.reconfigure() {
            warn!(%error, "failed to restore session timeouts");
        }
        self.data.clear();
        outcome
    }

    /// Response body of the last call, or the transport's error text.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// [`data`](Self::data) as text, lossily decoded.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Final HTTP status of the last call, `0` when no response arrived.
    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    /// URL of the final response of the last call.
    #[must_use]
    pub fn effective_url(&self) -> Option<&Url> {
        self.effective_url.as_ref()
    }

    /// `Content-Type` of the final response of the last call.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// Captured hops of the last call.
    #[must_use]
    pub fn hops(&self) -> &[Hop] {
        self.capture.hops()
    }

    /// Header variables per hop.
    #[must_use]
    pub fn vars(&self) -> Vec<&BTreeMap<String, HeaderVar>> {
        self.capture.hops().iter().map(|hop| &hop.vars).collect()
    }

    /// Log of the last call.
    #[must_use]
    pub fn log(&self) -> &ExecLog {
        &self.log
    }

    /// Live cookies, purging expired ones.
    pub fn cookies(&mut self) -> Vec<Cookie> {
        self.cookies.snapshot()
    }

    /// Ends the session, writing the cookie jar file when one is set.
    ///
    /// # Errors
    ///
    /// Returns [`CookieFileError::Io`] if the cookie jar cannot be written.
    #[instrument(skip(self))]
    pub fn close(mut self) -> Result<(), CookieFileError> {
        if let Some(path) = self.config.cookie_jar.take() {
            let lines = merged_cookie_lines(&self.file_cookies, &self.cookies.snapshot());
            let file = File::create(&path)?;
            let mut writer = BufWriter::new(file);
            write_netscape_cookies(&mut writer, &lines)?;
            info!(cookies = lines.len(), path = %path.display(), "wrote cookie jar");
        }
        self.data.clear();
        self.capture.reset();
        self.cookies.clear();
        self.log = ExecLog::default();
        Ok(())
    }
}

/// Resolves a cookie file setting, rejecting empty paths and directories.
fn checked_cookie_path(path: &Path) -> Result<std::path::PathBuf, ConfigWarning> {
    if path.as_os_str().is_empty() {
        return Err(ConfigWarning::CookieFileUnusable {
            path: path.to_path_buf(),
            reason: "empty path".to_string(),
        });
    }
    let resolved = resolve_from_cwd(path);
    if resolved.is_dir() {
        return Err(ConfigWarning::CookieFileUnusable {
            path: resolved,
            reason: "is a directory".to_string(),
        });
    }
    Ok(resolved)
}

/// File cookies overlaid with the store's live cookies; the store wins.
fn merged_cookie_lines(file_cookies: &[CookieLine], live: &[Cookie]) -> Vec<CookieLine> {
    let mut merged: Vec<CookieLine> = file_cookies.to_vec();
    for cookie in live {
        let line = CookieLine::from(cookie);
        let identity = line.identity();
        if let Some(slot) = merged.iter_mut().find(|existing| existing.identity() == identity) {
            *slot = line;
        } else {
            merged.push(line);
        }
    }
    merged
}

async fn resolve_host(host: Option<&str>, port: u16) -> String {
    let Some(host) = host else {
        return String::new();
    };
    match tokio::net::lookup_host((host, port)).await {
        Ok(mut addrs) => addrs
            .next()
            .map_or_else(|| host.to_string(), |addr| addr.ip().to_string()),
        Err(_) => host.to_string(),
    }
}

/// Single-line summary: UTC time of day, host, seconds, kilobytes, kB/s.
fn format_summary(now: i64, host: &str, info: &TransferInfo) -> String {
    let seconds_of_day = now.rem_euclid(86_400);
    let (hours, minutes, seconds) = (
        seconds_of_day / 3600,
        seconds_of_day % 3600 / 60,
        seconds_of_day % 60,
    );
    let total_time = info.total_time.as_secs_f64();
    #[allow(clippy::cast_precision_loss)]
    let kilobytes = (info.size_upload + info.size_download) as f64 / 1024.0;
    let speed = if total_time > 0.0 {
        kilobytes / total_time
    } else {
        0.0
    };
    format!(
        "[utc:{hours:02}:{minutes:02}:{seconds:02}][host:{host}][time:{total_time:.2}][size:{kilobytes:.2}k][speed:{speed:.2}k/s]"
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_format_summary() {
        let info = TransferInfo {
            http_code: 200,
            total_time: Duration::from_millis(2000),
            size_upload: 1024,
            size_download: 3072,
            ..TransferInfo::default()
        };
        // 1_800_000_000 is 08:00:00 UTC
        assert_eq!(
            format_summary(1_800_000_000, "10.0.0.1", &info),
            "[utc:08:00:00][host:10.0.0.1][time:2.00][size:4.00k][speed:2.00k/s]"
        );
    }

    #[test]
    fn test_format_summary_zero_time() {
        let info = TransferInfo::default();
        assert!(format_summary(0, "h", &info).ends_with("[time:0.00][size:0.00k][speed:0.00k/s]"));
    }

    fn cookie_line(domain: &str, tailmatch: bool, name: &str, value: &str) -> CookieLine {
        CookieLine::new(
            domain.to_string(),
            tailmatch,
            "/".to_string(),
            false,
            false,
            0,
            name.to_string(),
            value.to_string(),
        )
    }

    #[test]
    fn test_merged_cookie_lines_store_wins() {
        let file_cookies = vec![
            cookie_line(".example.com", true, "sid", "old"),
            cookie_line("other.com", false, "keep", "1"),
        ];
        let mut store = CookieStore::new();
        let url = Url::parse("http://www.example.com/").unwrap();
        store.set_cookie_at("sid=new; Domain=example.com", &url, 1_800_000_000);
        store.set_cookie_at("fresh=1", &url, 1_800_000_000);
        let live = store.snapshot_at(1_800_000_000);

        let merged = merged_cookie_lines(&file_cookies, &live);
        assert_eq!(merged.len(), 3);
        let sid = merged.iter().find(|line| line.name == "sid").unwrap();
        assert_eq!(sid.value(), "new");
        assert!(merged.iter().any(|line| line.name == "keep"));
        assert!(merged.iter().any(|line| line.name == "fresh"));
    }

    #[test]
    fn test_checked_cookie_path_rejects_empty_and_dirs() {
        assert!(checked_cookie_path(Path::new("")).is_err());
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            checked_cookie_path(dir.path()),
            Err(ConfigWarning::CookieFileUnusable { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_becomes_body_text() {
        let mut session = Session::new().unwrap();
        session
            .exec("not a url", Method::GET, &Fields::new(), &[])
            .await;
        assert!(session.text().contains("invalid URL"));
        assert_eq!(session.status(), 0);
        assert!(session.hops().is_empty());
    }

    #[tokio::test]
    async fn test_cookie_file_blocks_send_cookies_toggle() {
        let dir = TempDir::new().unwrap();
        let mut session = Session::new().unwrap();
        session.set_send_cookies(true).unwrap();
        assert!(session.send_cookies());

        let warnings = session.set_opt([Setting::CookieFile(dir.path().join("cookies.txt"))]);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(dir.path().join("cookies.txt").exists());
        assert_eq!(
            session.set_send_cookies(false),
            Err(ConfigWarning::FileCookiesActive)
        );

        let again = session.set_opt([Setting::CookieFile(dir.path().join("other.txt"))]);
        assert_eq!(
            again,
            vec![ConfigWarning::AlreadySet {
                key: SettingKey::CookieFile
            }]
        );
    }

    #[tokio::test]
    async fn test_locked_setting_reported_and_others_applied() {
        let mut session = Session::new().unwrap();
        let warnings = session.set_opt([
            Setting::CaptureHeaders(false),
            Setting::MaxRedirects(2),
        ]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(session.config().max_redirects, 2);
    }

    #[test]
    fn test_close_writes_cookie_jar() {
        let dir = TempDir::new().unwrap();
        let jar_path = dir.path().join("jar.txt");
        let config = SessionConfig {
            cookie_jar: Some(jar_path.clone()),
            ..SessionConfig::default()
        };
        let mut session = Session::with_config(config).unwrap();
        assert!(session.config_warnings().is_empty());
        let url = Url::parse("http://example.com/").unwrap();
        session
            .cookies
            .set_cookie("token=abc; Max-Age=3600", &url);
        session.close().unwrap();

        let written = std::fs::read_to_string(&jar_path).unwrap();
        assert!(written.contains("example.com\tFALSE\t/\tFALSE\t"), "{written}");
        assert!(written.contains("token\tabc"), "{written}");
    }
}
