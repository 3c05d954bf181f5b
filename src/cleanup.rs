use crate::error::{GistError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Paths created by this run, in creation order.
#[derive(Debug, Default)]
pub struct CleanupList {
    paths: Vec<PathBuf>,
}

impl CleanupList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: PathBuf) {
        tracing::debug!(path = %path.display(), "tracking path for cleanup");
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Removes tracked paths last-created first. Stops at the first failure.
    pub fn teardown(self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::with_capacity(self.paths.len());
        for path in self.paths.into_iter().rev() {
            if remove_path(&path)? {
                println!("Removed {}", path.display());
                removed.push(path);
            } else {
                tracing::debug!(path = %path.display(), "already gone, skipping");
            }
        }
        Ok(removed)
    }
}

fn remove_path(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(GistError::Cleanup {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let result = if meta.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|source| GistError::Cleanup {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(true)
}

/// Returns the shallowest ancestor of `path` (or `path` itself) that does not
/// exist yet. Creating `path` with `create_dir_all` creates exactly that
/// directory and everything below it.
pub fn first_missing_ancestor(path: &Path) -> Option<PathBuf> {
    if path.exists() {
        return None;
    }
    let mut missing = path.to_path_buf();
    while let Some(parent) = missing.parent() {
        if parent.as_os_str().is_empty() || parent.exists() {
            break;
        }
        missing = parent.to_path_buf();
    }
    Some(missing)
}

/// `create_dir_all` that records the newly created top directory.
pub fn ensure_dir(path: &Path, cleanup: &mut CleanupList) -> Result<bool> {
    match first_missing_ancestor(path) {
        Some(created) => {
            fs::create_dir_all(path)?;
            cleanup.push(created);
            Ok(true)
        }
        None => Ok(false),
    }
}
