//! Download and upload helpers built on a [`Session`].
//!
//! Both helpers run with transfer-sized timeouts (30 s connect, 600 s total)
//! and restore the session's own timeouts afterwards, whatever the outcome.

mod error;
pub(crate) mod filename;

pub use error::TransferError;

use std::path::{Path, PathBuf};

use reqwest::Method;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cookies::unix_now;
use crate::paths::{is_writable, resolve_from_cwd};
use crate::redact::mask_credentials;
use crate::session::Session;
use crate::transport::{BodyTarget, RequestBody, TransportRequest, is_transfer_url};
use filename::{
    collision_safe_path, content_disposition_filename, derive_filename, sanitize_filename,
    stamped_name,
};

/// Prefix of every temp file this crate creates.
pub(crate) const TEMP_PREFIX: &str = "lf_";

/// Directory downloads land in when none is given.
pub const DEFAULT_DOWNLOAD_DIR: &str = "./temp";

/// Mode given to downloaded files.
#[cfg(unix)]
const DOWNLOAD_FILE_MODE: u32 = 0o644;

impl Session {
    /// Downloads `url` into `local_dir` (default `./temp`).
    ///
    /// The name comes from `local_name`, else the final response's
    /// `Content-Disposition`, else the URL's file name (with an extension
    /// from the content type when it has none), else the staging file's name.
    /// An existing target gets the Unix time appended to its stem unless
    /// `overwrite` is set.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] for non-transfer URLs, transport failures,
    /// statuses of 400 and above, empty bodies, and unwritable targets.
    #[instrument(skip(self, local_dir, local_name), fields(url = %mask_credentials(url)))]
    pub async fn download(
        &mut self,
        url: &str,
        local_dir: Option<&Path>,
        local_name: Option<&str>,
        overwrite: bool,
    ) -> Result<PathBuf, TransferError> {
        let masked = mask_credentials(url);
        if !is_transfer_url(url) {
            return Err(TransferError::invalid_url(masked));
        }
        let parsed = Url::parse(url.trim()).map_err(|_| TransferError::invalid_url(&masked))?;

        let staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile()
            .map_err(|e| TransferError::io(std::env::temp_dir(), e))?
            .into_temp_path();
        let mut request = TransportRequest::get(parsed);
        request.target = BodyTarget::File(staged.to_path_buf());

        let response = self
            .run_transfer(request)
            .await
            .map_err(|e| TransferError::transport(&masked, e))?;
        if response.status >= 400 {
            return Err(TransferError::http_status(masked, response.status));
        }
        let size = tokio::fs::metadata(&staged)
            .await
            .map_err(|e| TransferError::io(staged.to_path_buf(), e))?
            .len();
        if size == 0 {
            return Err(TransferError::EmptyBody { url: masked });
        }

        let dir = resolve_from_cwd(local_dir.unwrap_or(Path::new(DEFAULT_DOWNLOAD_DIR)));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TransferError::io(dir.clone(), e))?;

        let name = match local_name.map(str::trim).filter(|name| !name.is_empty()) {
            Some(name) => sanitize_filename(name),
            None => {
                let disposition = self
                    .hops()
                    .last()
                    .and_then(|hop| content_disposition_filename(&hop.lines));
                let fallback = staged
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                derive_filename(
                    disposition.as_deref(),
                    &response.effective_url,
                    response.content_type.as_deref(),
                    &fallback,
                )
            }
        };
        let target = collision_safe_path(&dir, &name, overwrite);
        if !is_writable(&target) {
            return Err(TransferError::NotWritable { path: target });
        }

        if let Err(persist_error) = staged.persist(&target) {
            debug!(error = %persist_error.error, "rename failed, copying staged file");
            tokio::fs::copy(&persist_error.path, &target)
                .await
                .map_err(|e| TransferError::io(target.clone(), e))?;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(error) = tokio::fs::set_permissions(
                &target,
                std::fs::Permissions::from_mode(DOWNLOAD_FILE_MODE),
            )
            .await
            {
                warn!(path = %target.display(), %error, "failed to set file mode");
            }
        }

        info!(path = %target.display(), bytes = size, "download complete");
        Ok(target)
    }

    /// Uploads a local file to `remote_dir` with a streamed `PUT`.
    ///
    /// The remote name defaults to the local base name. Unless `overwrite`
    /// is set, a `HEAD` probe checks for an existing remote file and the Unix
    /// time is appended to the stem when one answers.
    ///
    /// Returns the credential-masked remote URL.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] for missing, directory, or unreadable local
    /// files, non-transfer remote URLs, transport failures, and statuses of
    /// 400 and above.
    #[instrument(skip(self, remote_name), fields(file = %file.display(), remote = %mask_credentials(remote_dir)))]
    pub async fn upload(
        &mut self,
        file: &Path,
        remote_dir: &str,
        remote_name: Option<&str>,
        overwrite: bool,
    ) -> Result<String, TransferError> {
        if file.as_os_str().is_empty() {
            return Err(TransferError::MissingFile {
                path: file.to_path_buf(),
            });
        }
        let local = resolve_from_cwd(file);
        if !local.exists() {
            return Err(TransferError::MissingFile {
                path: file.to_path_buf(),
            });
        }
        if local.is_dir() {
            return Err(TransferError::IsDirectory {
                path: file.to_path_buf(),
            });
        }
        let length = tokio::fs::File::open(&local)
            .await
            .map_err(|e| TransferError::io(file, e))?
            .metadata()
            .await
            .map_err(|e| TransferError::io(file, e))?
            .len();

        let masked_dir = mask_credentials(remote_dir);
        if !is_transfer_url(remote_dir) {
            return Err(TransferError::invalid_url(masked_dir));
        }
        let base = Url::parse(&format!("{}/", remote_dir.trim().trim_end_matches('/')))
            .map_err(|_| TransferError::invalid_url(&masked_dir))?;

        let name = remote_name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || {
                    local
                        .file_name()
                        .map(|name| name.to_string_lossy().into_owned())
                        .unwrap_or_default()
                },
                str::to_string,
            );
        let mut target = remote_target(&base, &name, &masked_dir)?;

        if !overwrite {
            let mut probe = TransportRequest::get(target.clone());
            probe.method = Method::HEAD;
            let probed = self
                .run_transfer(probe)
                .await
                .map_err(|e| TransferError::transport(mask_credentials(target.as_str()), e))?;
            if (200..300).contains(&probed.status) {
                let renamed = stamped_name(&name, unix_now(), |_| false);
                debug!(existing = %name, renamed = %renamed, "remote name taken");
                target = remote_target(&base, &renamed, &masked_dir)?;
            }
        }

        let masked_target = mask_credentials(target.as_str());
        let request = TransportRequest {
            url: target,
            method: Method::PUT,
            body: RequestBody::File {
                path: local,
                length,
            },
            referer: None,
            target: BodyTarget::Memory,
        };
        let response = self
            .run_transfer(request)
            .await
            .map_err(|e| TransferError::transport(&masked_target, e))?;
        if response.status >= 400 {
            return Err(TransferError::http_status(masked_target, response.status));
        }

        info!(remote = %masked_target, bytes = length, "upload complete");
        Ok(masked_target)
    }
}

fn remote_target(base: &Url, name: &str, masked_dir: &str) -> Result<Url, TransferError> {
    base.join(&urlencoding::encode(name))
        .map_err(|_| TransferError::invalid_url(format!("{masked_dir}/{name}")))
}
