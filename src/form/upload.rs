//! File-reference resolution for multipart submissions.
//!
//! A flattened value is a file reference only when it starts with
//! [`FILE_SENTINEL`] and appears verbatim in the caller's manifest. Remote
//! sources are fetched into temporary files first; temp files live as long
//! as the [`Resolution`] that owns them.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

use super::mime::{is_plausible_mime, sniff_file};
use super::{FILE_SENTINEL, FlatField};
use crate::paths::resolve_local_path;
use crate::redact::mask_credentials;
use crate::transfer::TEMP_PREFIX;
use crate::transfer::filename::{content_disposition_filename, derive_filename};
use crate::transport::{MultipartField, Transport, is_transfer_url};

/// A parsed file marker: `@source[\tfilename=name][\ttype=mime]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    /// Local path or remote URL.
    pub source: String,
    /// Filename override.
    pub filename: Option<String>,
    /// MIME type override.
    pub mime_type: Option<String>,
}

impl FileReference {
    /// Parses a marker. Returns `None` without the sentinel prefix.
    ///
    /// At most two override segments are read; a tab after the second stays
    /// in its value. Unknown or empty override segments are ignored.
    #[must_use]
    pub fn parse(marker: &str) -> Option<Self> {
        let body = marker.strip_prefix(FILE_SENTINEL)?;
        let mut segments = body.splitn(3, '\t');
        let source = segments.next().unwrap_or_default().to_string();
        let mut reference = Self {
            source,
            filename: None,
            mime_type: None,
        };
        for segment in segments {
            let Some((key, value)) = segment.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim().to_ascii_lowercase().as_str() {
                "filename" => reference.filename = Some(value.to_string()),
                "type" => reference.mime_type = Some(value.to_string()),
                _ => {}
            }
        }
        Some(reference)
    }
}

/// A local file ready to be sent as a multipart file part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    /// File on disk.
    pub path: PathBuf,
    /// Filename sent in the part's disposition.
    pub filename: String,
    /// Part content type.
    pub mime_type: String,
}

/// Final content of one flattened field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldContent {
    /// Text value.
    Text(String),
    /// Absent value, sent as an empty text part.
    Absent,
    /// File part.
    File(FilePart),
}

/// One resolved field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    /// Bracketed field path.
    pub path: String,
    /// Resolved content.
    pub content: FieldContent,
}

/// Non-fatal resolution problems. The field degrades to an empty value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveWarning {
    /// The local file does not exist.
    #[error("field '{field}': file '{source_name}' not found")]
    MissingFile {
        /// Field path.
        field: String,
        /// Reference as written by the caller.
        source_name: String,
    },

    /// The remote source could not be fetched.
    #[error("field '{field}': fetching {url} failed: {reason}")]
    FetchFailed {
        /// Field path.
        field: String,
        /// Credential-masked URL.
        url: String,
        /// Failure description.
        reason: String,
    },

    /// The remote source answered with an error status.
    #[error("field '{field}': fetching {url} returned HTTP {status}")]
    FetchStatus {
        /// Field path.
        field: String,
        /// Credential-masked URL.
        url: String,
        /// Response status.
        status: u16,
    },
}

/// Resolved fields plus the temp files backing them.
///
/// Temp files are deleted when this value is dropped.
#[derive(Debug, Default)]
pub struct Resolution {
    /// Fields in flattened order.
    pub fields: Vec<ResolvedField>,
    /// Problems encountered, in order.
    pub warnings: Vec<ResolveWarning>,
    temp_files: Vec<TempPath>,
}

impl Resolution {
    /// Multipart body fields. Absent values become empty text parts.
    #[must_use]
    pub fn multipart_fields(&self) -> Vec<MultipartField> {
        self.fields
            .iter()
            .map(|field| match &field.content {
                FieldContent::Text(value) => MultipartField::Text {
                    name: field.path.clone(),
                    value: value.clone(),
                },
                FieldContent::Absent => MultipartField::Text {
                    name: field.path.clone(),
                    value: String::new(),
                },
                FieldContent::File(part) => MultipartField::File {
                    name: field.path.clone(),
                    part: part.clone(),
                },
            })
            .collect()
    }

    /// Paths of temp files currently held.
    #[must_use]
    pub fn temp_paths(&self) -> Vec<PathBuf> {
        self.temp_files.iter().map(|temp| temp.to_path_buf()).collect()
    }
}

struct Fetched {
    path: PathBuf,
    filename: String,
    content_type: Option<String>,
}

/// Resolves manifest-listed file markers into file parts.
pub struct UploadResolver<'a> {
    transport: &'a dyn Transport,
    working_dir: PathBuf,
}

impl<'a> UploadResolver<'a> {
    /// Creates a resolver fetching remote sources through `transport`'s secondary sessions.
    #[must_use]
    pub fn new(transport: &'a dyn Transport) -> Self {
        Self {
            transport,
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Resolves `./` paths against `dir` instead of the process working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Resolves every flattened field.
    #[instrument(skip_all, fields(fields = flat.len(), manifest = manifest.len()))]
    pub async fn resolve(&self, flat: Vec<FlatField>, manifest: &[String]) -> Resolution {
        let mut resolution = Resolution::default();
        for FlatField { path, value } in flat {
            let content = match value {
                None => FieldContent::Absent,
                Some(text) if text.starts_with(FILE_SENTINEL) && manifest.contains(&text) => {
                    self.resolve_file(&path, &text, &mut resolution).await
                }
                Some(text) => FieldContent::Text(text),
            };
            resolution.fields.push(ResolvedField { path, content });
        }
        resolution
    }

    async fn resolve_file(
        &self,
        field: &str,
        marker: &str,
        resolution: &mut Resolution,
    ) -> FieldContent {
        let Some(FileReference {
            source,
            mut filename,
            mut mime_type,
        }) = FileReference::parse(marker)
        else {
            return FieldContent::Text(marker.to_string());
        };

        let local = if is_transfer_url(&source) {
            match self
                .prefetch(
                    field,
                    &source,
                    mime_type.as_deref().filter(|mime| is_plausible_mime(mime)),
                    resolution,
                )
                .await
            {
                Ok(fetched) => {
                    filename = filename.or(Some(fetched.filename));
                    mime_type = mime_type.or(fetched.content_type);
                    fetched.path
                }
                Err(warning) => {
                    warn!(%warning, "remote file reference degraded to empty value");
                    resolution.warnings.push(warning);
                    return FieldContent::Text(String::new());
                }
            }
        } else {
            resolve_local_path(&source, &self.working_dir)
        };

        if !local.is_file() {
            let warning = ResolveWarning::MissingFile {
                field: field.to_string(),
                source_name: mask_credentials(&source),
            };
            warn!(%warning, "file reference degraded to empty value");
            resolution.warnings.push(warning);
            return FieldContent::Text(String::new());
        }

        let filename = filename.unwrap_or_else(|| base_name(&local));
        let mime_type = match mime_type {
            Some(mime) if is_plausible_mime(&mime) => mime,
            other => {
                if let Some(rejected) = other {
                    debug!(field, mime = %rejected, "ignoring malformed MIME override");
                }
                sniff_file(&local)
            }
        };
        debug!(field, filename = %filename, mime = %mime_type, "resolved file part");
        FieldContent::File(FilePart {
            path: local,
            filename,
            mime_type,
        })
    }

    /// Fetches a remote reference into a temp file.
    ///
    /// The explicit `type=` override, then the response content type, supplies
    /// the extension of a derived name.
    async fn prefetch(
        &self,
        field: &str,
        source: &str,
        explicit_mime: Option<&str>,
        resolution: &mut Resolution,
    ) -> Result<Fetched, ResolveWarning> {
        let masked = mask_credentials(source);
        let failed = |reason: String| ResolveWarning::FetchFailed {
            field: field.to_string(),
            url: masked.clone(),
            reason: mask_credentials(&reason),
        };

        let url = Url::parse(source).map_err(|e| failed(e.to_string()))?;
        let temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile()
            .map_err(|e| failed(e.to_string()))?
            .into_temp_path();
        let path = temp.to_path_buf();
        resolution.temp_files.push(temp);

        let secondary = self
            .transport
            .secondary()
            .map_err(|e| failed(e.to_string()))?;
        let outcome = secondary
            .fetch_to_file(&url, &path)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !(200..400).contains(&outcome.status) {
            return Err(ResolveWarning::FetchStatus {
                field: field.to_string(),
                url: masked.clone(),
                status: outcome.status,
            });
        }
        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| failed(e.to_string()))?
            .len();
        if size == 0 {
            return Err(failed("empty body".to_string()));
        }

        let disposition = content_disposition_filename(&outcome.header_lines);
        let filename = derive_filename(
            disposition.as_deref(),
            &url,
            explicit_mime.or(outcome.content_type.as_deref()),
            &base_name(&path),
        );
        debug!(field, url = %masked, filename = %filename, "fetched remote file reference");
        Ok(Fetched {
            path,
            filename,
            content_type: outcome.content_type,
        })
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
