//! Transport seam between sessions and the network engine.
//!
//! A [`Transport`] performs one request (following redirects itself) and
//! reports every raw response header line to a [`HeaderSink`], including the
//! blank line closing each response's header block. Sessions never touch the
//! network directly; they build a [`TransportRequest`] and consume the
//! header events plus the final [`TransportResponse`].
//!
//! [`ReqwestTransport`] is the production engine. Tests substitute scripted
//! transports through [`Session::with_transport`](crate::Session::with_transport).

mod error;
mod http;

pub use error::TransportError;
pub use http::ReqwestTransport;

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::cookie::Jar;
use serde::Serialize;
use url::Url;

use crate::config::SessionConfig;
use crate::form::FilePart;

/// Receives raw header lines while a transport call is in flight.
///
/// Called synchronously, once per line, in arrival order. `effective_url` is
/// the URL of the response the line belongs to.
pub trait HeaderSink {
    /// Handles one raw header line, terminators included.
    fn header_line(&mut self, line: &str, effective_url: &Url);
}

/// Collects header lines verbatim. Used for secondary fetches.
#[derive(Debug, Default)]
pub struct LineCollector {
    /// Lines in arrival order.
    pub lines: Vec<String>,
}

impl HeaderSink for LineCollector {
    fn header_line(&mut self, line: &str, _effective_url: &Url) {
        self.lines.push(line.to_string());
    }
}

/// One field of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultipartField {
    /// Plain text part.
    Text {
        /// Field path.
        name: String,
        /// Field content.
        value: String,
    },
    /// File part streamed from disk.
    File {
        /// Field path.
        name: String,
        /// Local file and its upload metadata.
        part: FilePart,
    },
}

/// Request payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` payload.
    UrlEncoded(String),
    /// `multipart/form-data` payload, rebuilt for every hop that resends it.
    Multipart(Vec<MultipartField>),
    /// Raw file contents, streamed (uploads).
    File {
        /// Local file to stream.
        path: PathBuf,
        /// File size in bytes.
        length: u64,
    },
}

impl RequestBody {
    /// Approximate payload size in bytes.
    #[must_use]
    pub fn approximate_len(&self) -> u64 {
        match self {
            Self::Empty => 0,
            Self::UrlEncoded(encoded) => encoded.len() as u64,
            Self::Multipart(fields) => fields
                .iter()
                .map(|field| match field {
                    MultipartField::Text { name, value } => (name.len() + value.len()) as u64,
                    MultipartField::File { name, part } => {
                        name.len() as u64
                            + std::fs::metadata(&part.path).map(|meta| meta.len()).unwrap_or(0)
                    }
                })
                .sum(),
            Self::File { length, .. } => *length,
        }
    }
}

/// Where the final response body goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BodyTarget {
    /// Buffered into [`TransportResponse::body`].
    #[default]
    Memory,
    /// Streamed into this file, which is created or truncated.
    File(PathBuf),
}

/// A request handed to a transport.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Target URL.
    pub url: Url,
    /// Request method.
    pub method: Method,
    /// Payload.
    pub body: RequestBody,
    /// Referer for the first hop.
    pub referer: Option<String>,
    /// Body destination.
    pub target: BodyTarget,
}

impl TransportRequest {
    /// GET request with an in-memory body.
    #[must_use]
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            body: RequestBody::Empty,
            referer: None,
            target: BodyTarget::Memory,
        }
    }
}

/// Transfer statistics for one call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferInfo {
    /// Final HTTP status.
    pub http_code: u16,
    /// Redirects followed.
    pub redirect_count: u32,
    /// Address of the server that sent the final response.
    pub primary_ip: Option<IpAddr>,
    /// Wall time of the whole call, redirects included.
    pub total_time: Duration,
    /// Approximate bytes sent.
    pub size_upload: u64,
    /// Body bytes received for the final response.
    pub size_download: u64,
}

/// Outcome of a completed transport call.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    /// Body bytes (empty when streamed to a file).
    pub body: Vec<u8>,
    /// URL of the final response.
    pub effective_url: Url,
    /// Final HTTP status.
    pub status: u16,
    /// `Content-Type` of the final response.
    pub content_type: Option<String>,
    /// Request line and headers of the final request.
    pub request_lines: Vec<String>,
    /// Timing and size statistics.
    pub info: TransferInfo,
}

/// Outcome of a secondary fetch into a file.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Final HTTP status.
    pub status: u16,
    /// `Content-Type` of the final response.
    pub content_type: Option<String>,
    /// Every raw header line received, blank separators included.
    pub header_lines: Vec<String>,
    /// URL of the final response.
    pub effective_url: Url,
}

/// Network engine used by sessions.
///
/// # Object Safety
///
/// Uses `async_trait` so sessions can hold a `Box<dyn Transport>`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Applies session configuration. `cookie_jar` enables outgoing cookies.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] when the engine rejects the settings.
    fn configure(
        &mut self,
        config: &SessionConfig,
        cookie_jar: Option<Arc<Jar>>,
    ) -> Result<(), TransportError>;

    /// Executes a request, reporting every header line to `sink`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no final response was obtained.
    async fn execute(
        &self,
        request: TransportRequest,
        sink: &mut (dyn HeaderSink + Send),
    ) -> Result<TransportResponse, TransportError>;

    /// Opens an independent session sharing this one's TLS policy but no
    /// cookie or header state, with transfer-sized timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] when the secondary engine cannot be built.
    fn secondary(&self) -> Result<Box<dyn Transport>, TransportError>;

    /// Streams `url` into `destination`, following redirects.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no final response was obtained.
    async fn fetch_to_file(
        &self,
        url: &Url,
        destination: &Path,
    ) -> Result<FetchOutcome, TransportError> {
        let mut request = TransportRequest::get(url.clone());
        request.target = BodyTarget::File(destination.to_path_buf());
        let mut collector = LineCollector::default();
        let response = self.execute(request, &mut collector).await?;
        Ok(FetchOutcome {
            status: response.status,
            content_type: response.content_type,
            header_lines: collector.lines,
            effective_url: response.effective_url,
        })
    }
}

/// Returns true for URLs a transfer helper accepts (`http`, `https`, `ftp`).
#[must_use]
pub fn is_transfer_url(candidate: &str) -> bool {
    let lower = candidate.trim_start().to_ascii_lowercase();
    ["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}
