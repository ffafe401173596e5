//! Error types for transport calls.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that prevent a transport call from producing a final response.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error requesting {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The engine does not speak the URL's scheme.
    #[error("unsupported protocol for {url}")]
    UnsupportedScheme {
        /// The rejected URL.
        url: String,
    },

    /// A redirect target could not be resolved against the current URL.
    #[error("invalid redirect location '{location}' from {url}")]
    InvalidRedirect {
        /// URL that sent the redirect.
        url: String,
        /// Raw `Location` value.
        location: String,
    },

    /// The redirect limit was exceeded.
    #[error("maximum ({max}) redirects followed requesting {url}")]
    TooManyRedirects {
        /// The URL of the last redirect received.
        url: String,
        /// Configured limit.
        max: u32,
    },

    /// File system error while streaming a body.
    #[error("IO error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The HTTP engine could not be built with the requested settings.
    #[error("failed to build HTTP client: {source}")]
    Build {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },
}

impl TransportError {
    /// Creates a network error, promoting timeouts to [`TransportError::Timeout`].
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Network {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates an unsupported-scheme error.
    pub fn unsupported_scheme(url: impl Into<String>) -> Self {
        Self::UnsupportedScheme { url: url.into() }
    }

    /// Creates an invalid-redirect error.
    pub fn invalid_redirect(url: impl Into<String>, location: impl Into<String>) -> Self {
        Self::InvalidRedirect {
            url: url.into(),
            location: location.into(),
        }
    }

    /// Creates a redirect-limit error.
    pub fn too_many_redirects(url: impl Into<String>, max: u32) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            max,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a builder error.
    pub fn build(source: reqwest::Error) -> Self {
        Self::Build { source }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_scheme_display() {
        let msg = TransportError::unsupported_scheme("ftp://example.com/a").to_string();
        assert!(msg.contains("unsupported protocol"), "got: {msg}");
        assert!(msg.contains("ftp://example.com/a"));
    }

    #[test]
    fn test_too_many_redirects_display() {
        let msg = TransportError::too_many_redirects("http://h/loop", 5).to_string();
        assert!(msg.contains("maximum (5) redirects"), "got: {msg}");
    }

    #[test]
    fn test_io_display_includes_path() {
        let error = TransportError::io(
            "/tmp/out.bin",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/tmp/out.bin"));
    }
}
