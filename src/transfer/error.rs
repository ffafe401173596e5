//! Error types for the transfer helpers.

use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur during downloads and uploads.
///
/// URLs are stored credential-masked.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Only `http(s)://` and `ftp://` URLs are transferred.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },

    /// The request could not complete.
    #[error("transfer of {url} failed: {source}")]
    Transport {
        /// The URL involved.
        url: String,
        /// The underlying transport error.
        #[source]
        source: TransportError,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} transferring {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// The server sent no bytes; nothing was kept.
    #[error("empty response body from {url}")]
    EmptyBody {
        /// The URL involved.
        url: String,
    },

    /// File system error while staging or moving a file.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The local file to upload does not exist.
    #[error("file not found: {path}")]
    MissingFile {
        /// The missing path.
        path: PathBuf,
    },

    /// The local path to upload is a directory.
    #[error("{path} is a directory")]
    IsDirectory {
        /// The offending path.
        path: PathBuf,
    },

    /// The download target cannot be written.
    #[error("{path} is not writable")]
    NotWritable {
        /// The offending path.
        path: PathBuf,
    },
}

impl TransferError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a transport error.
    pub fn transport(url: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_error_http_status_display() {
        let error = TransferError::http_status("https://example.com/file.pdf", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://example.com/file.pdf"));
    }

    #[test]
    fn test_transfer_error_transport_keeps_source() {
        let error = TransferError::transport(
            "ftp://*:*@h/x",
            TransportError::unsupported_scheme("ftp://*:*@h/x"),
        );
        let msg = error.to_string();
        assert!(msg.contains("unsupported protocol"), "got: {msg}");
        assert!(std::error::Error::source(&error).is_some());
    }

    #[test]
    fn test_transfer_error_io_display() {
        let error = TransferError::io(
            "/tmp/file.pdf",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        );
        assert!(error.to_string().contains("/tmp/file.pdf"));
    }
}
