//! reqwest-backed transport.
//!
//! The client is built with redirects disabled; [`ReqwestTransport::execute`]
//! follows them itself so every intermediate response's headers reach the
//! [`HeaderSink`] in order.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::cookie::Jar;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION, REFERER};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, ClientBuilder, Method, StatusCode, redirect};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    BodyTarget, HeaderSink, MultipartField, RequestBody, TransferInfo, Transport, TransportError,
    TransportRequest, TransportResponse,
};
use crate::config::SessionConfig;
use crate::user_agent;

const URLENCODED: &str = "application/x-www-form-urlencoded";

/// Production transport on top of `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    config: SessionConfig,
}

impl ReqwestTransport {
    /// Builds a transport for `config`, sending cookies from `cookie_jar` when given.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Build`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip_all)]
    pub fn new(config: &SessionConfig, cookie_jar: Option<Arc<Jar>>) -> Result<Self, TransportError> {
        let client = build_client(config, cookie_jar).map_err(TransportError::build)?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn build_request(
        &self,
        method: &Method,
        url: &Url,
        body: &RequestBody,
        referer: Option<&str>,
    ) -> Result<reqwest::Request, TransportError> {
        let mut builder = self.client.request(method.clone(), url.clone());
        for (name, value) in &self.config.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(referer) = referer {
            builder = builder.header(REFERER, referer);
        }
        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::UrlEncoded(encoded) => builder
                .header(CONTENT_TYPE, URLENCODED)
                .body(encoded.clone()),
            RequestBody::Multipart(fields) => builder.multipart(build_form(fields).await?),
            RequestBody::File { path, length } => {
                let file = File::open(path)
                    .await
                    .map_err(|e| TransportError::io(path.clone(), e))?;
                builder
                    .header(CONTENT_LENGTH, *length)
                    .body(Body::from(file))
            }
        };
        builder
            .build()
            .map_err(|e| TransportError::network(url.as_str(), e))
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    fn configure(
        &mut self,
        config: &SessionConfig,
        cookie_jar: Option<Arc<Jar>>,
    ) -> Result<(), TransportError> {
        *self = Self::new(config, cookie_jar)?;
        Ok(())
    }

    #[instrument(skip(self, request, sink), fields(method = %request.method))]
    async fn execute(
        &self,
        request: TransportRequest,
        sink: &mut (dyn HeaderSink + Send),
    ) -> Result<TransportResponse, TransportError> {
        if !matches!(request.url.scheme(), "http" | "https") {
            return Err(TransportError::unsupported_scheme(request.url.as_str()));
        }

        let started = Instant::now();
        let TransportRequest {
            mut url,
            mut method,
            mut body,
            mut referer,
            target,
        } = request;
        let mut redirect_count: u32 = 0;
        let mut size_upload: u64 = 0;

        loop {
            let outgoing = self
                .build_request(&method, &url, &body, referer.as_deref())
                .await?;
            let request_lines = describe_request(&outgoing, &self.config.user_agent);
            size_upload += body.approximate_len();

            let response = self
                .client
                .execute(outgoing)
                .await
                .map_err(|e| TransportError::network(url.as_str(), e))?;
            emit_header_block(&response, &url, sink);

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

            if self.config.follow_location
                && status.is_redirection()
                && let Some(location) = location
            {
                if redirect_count >= self.config.max_redirects {
                    return Err(TransportError::too_many_redirects(
                        url.as_str(),
                        self.config.max_redirects,
                    ));
                }
                let next = url
                    .join(location.trim())
                    .map_err(|_| TransportError::invalid_redirect(url.as_str(), &location))?;
                if !matches!(next.scheme(), "http" | "https") {
                    return Err(TransportError::unsupported_scheme(next.as_str()));
                }
                debug!(status = status.as_u16(), from = %url, to = %next, "following redirect");

                redirect_count += 1;
                if self.config.auto_referer {
                    referer = Some(url.to_string());
                }
                if switches_to_get(status, &method) {
                    method = Method::GET;
                    body = RequestBody::Empty;
                }
                url = next;
                continue;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            let primary_ip = response.remote_addr().map(|addr| addr.ip());

            let (body_bytes, size_download) = match &target {
                BodyTarget::Memory => {
                    let bytes = response
                        .bytes()
                        .await
                        .map_err(|e| TransportError::network(url.as_str(), e))?;
                    let len = bytes.len() as u64;
                    (bytes.to_vec(), len)
                }
                BodyTarget::File(path) => {
                    let written = stream_to_file(response, url.as_str(), path).await?;
                    (Vec::new(), written)
                }
            };

            return Ok(TransportResponse {
                body: body_bytes,
                effective_url: url,
                status: status.as_u16(),
                content_type,
                request_lines,
                info: TransferInfo {
                    http_code: status.as_u16(),
                    redirect_count,
                    primary_ip,
                    total_time: started.elapsed(),
                    size_upload,
                    size_download,
                },
            });
        }
    }

    fn secondary(&self) -> Result<Box<dyn Transport>, TransportError> {
        let mut config = SessionConfig {
            verify_tls: self.config.verify_tls,
            user_agent: user_agent::default_prefetch_user_agent(),
            ..SessionConfig::default()
        };
        config.use_transfer_timeouts();
        Ok(Box::new(Self::new(&config, None)?))
    }
}

fn build_client(
    config: &SessionConfig,
    cookie_jar: Option<Arc<Jar>>,
) -> Result<Client, reqwest::Error> {
    let mut builder: ClientBuilder = Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .gzip(config.compression)
        .user_agent(config.user_agent.as_str())
        .redirect(redirect::Policy::none())
        .danger_accept_invalid_certs(!config.verify_tls);
    if let Some(jar) = cookie_jar {
        builder = builder.cookie_provider(jar);
    }
    builder.build()
}

/// curl semantics: 303 turns everything but HEAD into GET, 301/302 only POST.
fn switches_to_get(status: StatusCode, method: &Method) -> bool {
    match status.as_u16() {
        303 => *method != Method::HEAD,
        301 | 302 => *method == Method::POST,
        _ => false,
    }
}

/// Reports the status line, each header, then the blank block terminator.
fn emit_header_block(response: &reqwest::Response, url: &Url, sink: &mut (dyn HeaderSink + Send)) {
    let status = response.status();
    sink.header_line(
        &format!(
            "{:?} {} {}\r\n",
            response.version(),
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        ),
        url,
    );
    for (name, value) in response.headers() {
        sink.header_line(
            &format!("{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes())),
            url,
        );
    }
    sink.header_line("\r\n", url);
}

fn describe_request(request: &reqwest::Request, user_agent: &str) -> Vec<String> {
    let url = request.url();
    let target = match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    };
    let host = match url.port() {
        Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    let mut lines = vec![
        format!("{} {target} HTTP/1.1", request.method()),
        format!("Host: {host}"),
        format!("User-Agent: {user_agent}"),
    ];
    for (name, value) in request.headers() {
        lines.push(format!("{}: {}", name, String::from_utf8_lossy(value.as_bytes())));
    }
    lines
}

async fn build_form(fields: &[MultipartField]) -> Result<Form, TransportError> {
    let mut form = Form::new();
    for field in fields {
        form = match field {
            MultipartField::Text { name, value } => form.text(name.clone(), value.clone()),
            MultipartField::File { name, part } => {
                let file = File::open(&part.path)
                    .await
                    .map_err(|e| TransportError::io(part.path.clone(), e))?;
                let length = file
                    .metadata()
                    .await
                    .map_err(|e| TransportError::io(part.path.clone(), e))?
                    .len();
                let upload = Part::stream_with_length(Body::from(file), length)
                    .file_name(part.filename.clone());
                let upload = match upload.mime_str(&part.mime_type) {
                    Ok(upload) => upload,
                    Err(error) => {
                        warn!(field = %name, mime = %part.mime_type, error = %error, "rejected MIME type");
                        return Err(TransportError::build(error));
                    }
                };
                form.part(name.clone(), upload)
            }
        };
    }
    Ok(form)
}

/// Streams the body into `file_path`, removing the partial file on error.
async fn stream_to_file(
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, TransportError> {
    let file = File::create(file_path)
        .await
        .map_err(|e| TransportError::io(file_path, e))?;
    let result = write_stream(file, response, url, file_path).await;
    if result.is_err() {
        debug!(path = %file_path.display(), "cleaning up partial file after error");
        let _ = tokio::fs::remove_file(file_path).await;
    }
    result
}

async fn write_stream(
    file: File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, TransportError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| TransportError::network(url, e))?;
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransportError::io(file_path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| TransportError::io(file_path, e))?;

    Ok(bytes_written)
}
