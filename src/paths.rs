//! Local path helpers shared by uploads, cookie files and transfers.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Rewrites a `./`-rooted path against `working_dir`; other paths are returned as given.
pub(crate) fn resolve_local_path(path: &str, working_dir: &Path) -> PathBuf {
    match path.strip_prefix("./") {
        Some(rest) => working_dir.join(rest),
        None => PathBuf::from(path),
    }
}

/// [`resolve_local_path`] against the process working directory.
pub(crate) fn resolve_from_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_local_path(&path.to_string_lossy(), &cwd)
}

/// True when `path` can be written: an existing file opens for writing, or a
/// missing file's parent directory exists and is not read-only.
pub(crate) fn is_writable(path: &Path) -> bool {
    if path.is_dir() {
        return false;
    }
    if path.exists() {
        return OpenOptions::new().append(true).open(path).is_ok();
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    parent
        .metadata()
        .is_ok_and(|meta| meta.is_dir() && !meta.permissions().readonly())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_local_path_dot_slash() {
        let base = Path::new("/srv/app");
        assert_eq!(
            resolve_local_path("./images/a.jpg", base),
            PathBuf::from("/srv/app/images/a.jpg")
        );
        assert_eq!(
            resolve_local_path("/abs/a.jpg", base),
            PathBuf::from("/abs/a.jpg")
        );
        assert_eq!(resolve_local_path("rel/a.jpg", base), PathBuf::from("rel/a.jpg"));
    }

    #[test]
    fn test_is_writable() {
        let dir = TempDir::new().unwrap();
        assert!(!is_writable(dir.path()));

        let new_file = dir.path().join("new.txt");
        assert!(is_writable(&new_file));

        std::fs::write(&new_file, b"x").unwrap();
        assert!(is_writable(&new_file));

        assert!(!is_writable(&dir.path().join("missing/dir/file.txt")));
    }
}
