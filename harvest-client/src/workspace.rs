//! Workspace snapshots and local path handling

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CompletionError, Result};

/// Copies a file or a directory tree from `src` to `dst`
///
/// Directories are merged into `dst`; existing files are overwritten.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    if src.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        return fs::copy(src, dst);
    }

    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            copied += fs::copy(entry.path(), &target)?;
        }
    }

    Ok(copied)
}

/// Takes a fresh snapshot of `source` for one experiment
///
/// The snapshot is a temporary directory under `cache` named after the
/// experiment and removed when the returned handle is dropped. Without a
/// source directory the snapshot is empty.
pub async fn snapshot(
    source: Option<&Path>,
    cache: &Path,
    experiment_name: &str,
) -> Result<TempDir> {
    let cache = cache.to_path_buf();
    let source = source.map(Path::to_path_buf);
    let prefix = format!("{}_", experiment_name);

    let (dir, copied) = tokio::task::spawn_blocking(move || -> io::Result<(TempDir, u64)> {
        fs::create_dir_all(&cache)?;
        let dir = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix("_workspace")
            .tempdir_in(&cache)?;
        let copied = match source {
            Some(source) => copy_tree(&source, dir.path())?,
            None => 0,
        };
        Ok((dir, copied))
    })
    .await
    .map_err(|e| CompletionError::Io(io::Error::other(e)))??;

    debug!("Workspace snapshot {} ({} bytes)", dir.path().display(), copied);

    Ok(dir)
}

/// Resolves a caller-supplied path to an absolute path
///
/// A leading `~` is expanded against `$HOME`.
pub fn resolve_local_path(path: &Path) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => {
            let home = std::env::var_os("HOME").ok_or_else(|| {
                CompletionError::InvalidRequest(format!(
                    "cannot expand {}: HOME is not set",
                    path.display()
                ))
            })?;
            PathBuf::from(home).join(rest)
        }
        Err(_) => path.to_path_buf(),
    };

    Ok(std::path::absolute(expanded)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_tree_copies_nested_files() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("data/raw")).unwrap();
        fs::write(src.path().join("train.py"), "print('hi')").unwrap();
        fs::write(src.path().join("data/raw/input.csv"), "a,b\n1,2\n").unwrap();

        let copied = copy_tree(src.path(), &dst.path().join("snap")).unwrap();

        assert_eq!(copied, 11 + 8);
        assert_eq!(
            fs::read_to_string(dst.path().join("snap/data/raw/input.csv")).unwrap(),
            "a,b\n1,2\n"
        );
        assert!(dst.path().join("snap/train.py").is_file());
    }

    #[test]
    fn test_copy_tree_single_file() {
        let src = TempDir::new().unwrap();
        let file = src.path().join("script.py");
        fs::write(&file, "x = 1").unwrap();

        let dst = src.path().join("copies/nested/script.py");
        copy_tree(&file, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst).unwrap(), "x = 1");
    }

    #[tokio::test]
    async fn test_snapshot_without_source_is_empty_dir() {
        let cache = TempDir::new().unwrap();

        let snap = snapshot(None, &cache.path().join("artifacts"), "exp_1")
            .await
            .unwrap();

        assert!(snap.path().starts_with(cache.path().join("artifacts")));
        assert!(snap
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("exp_1_"));
        assert!(snap.path().is_dir());
        assert_eq!(fs::read_dir(snap.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_copies_source_and_cleans_up() {
        let cache = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("model.py"), "weights = []").unwrap();

        let snap = snapshot(Some(source.path()), cache.path(), "exp_2")
            .await
            .unwrap();
        assert!(snap.path().join("model.py").is_file());

        drop(snap);
        assert_eq!(fs::read_dir(cache.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_resolve_local_path_makes_absolute() {
        let resolved = resolve_local_path(Path::new("data/input.csv")).unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("data/input.csv"));

        let absolute = resolve_local_path(Path::new("/srv/data.csv")).unwrap();
        assert_eq!(absolute, PathBuf::from("/srv/data.csv"));
    }
}
