//! Environment readiness report for the `env` command.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::paths::is_writable;
use crate::transfer::DEFAULT_DOWNLOAD_DIR;

/// Directory conventionally holding cookie files.
pub const DEFAULT_COOKIE_DIR: &str = "./cookies";

/// State of one working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirStatus {
    /// Directory checked.
    pub path: PathBuf,
    /// Whether it exists as a directory.
    pub exists: bool,
    /// Whether a new file can be created inside it.
    pub writable: bool,
}

impl DirStatus {
    fn check(path: PathBuf) -> Self {
        let exists = path.is_dir();
        let writable = exists && is_writable(&path.join(".lazyfetch-probe"));
        Self {
            path,
            exists,
            writable,
        }
    }
}

/// Versions and directory readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvReport {
    /// Crate version.
    pub version: String,
    /// Default user agent.
    pub user_agent: String,
    /// Cookie directory status.
    pub cookies_dir: DirStatus,
    /// Download directory status.
    pub temp_dir: DirStatus,
}

impl EnvReport {
    /// Checks the conventional directories under `base`.
    #[must_use]
    pub fn collect(base: &Path) -> Self {
        let under = |dir: &str| base.join(dir.trim_start_matches("./"));
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            user_agent: crate::user_agent::default_session_user_agent(),
            cookies_dir: DirStatus::check(under(DEFAULT_COOKIE_DIR)),
            temp_dir: DirStatus::check(under(DEFAULT_DOWNLOAD_DIR)),
        }
    }

    /// True when every directory exists and is writable.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        [&self.cookies_dir, &self.temp_dir]
            .iter()
            .all(|dir| dir.exists && dir.writable)
    }
}
