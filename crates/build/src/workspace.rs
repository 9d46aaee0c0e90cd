//! The scratch directory a generated program is built in.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{info, warn};

use crate::error::{BuildError, Result};

/// A build directory owned by exactly one build.
///
/// Removed when dropped unless it was created with `keep`.
pub struct BuildDir {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl BuildDir {
    pub fn create(keep: bool) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("luapack-build-")
            .tempdir()
            .map_err(|source| BuildError::BuildDir {
                path: std::env::temp_dir(),
                source,
            })?;
        let path = dir.path().to_path_buf();
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Writes a file below the build directory, creating parent directories.
    pub fn write(&self, relative: impl AsRef<Path>, contents: &str) -> Result<PathBuf> {
        let target = self.path.join(relative);
        ensure_parent(&target)?;
        fs::write(&target, contents).map_err(|source| BuildError::BuildDir {
            path: target.clone(),
            source,
        })?;
        Ok(target)
    }

    /// Copies a file into the build directory.
    pub fn copy(&self, from: &Path, relative: impl AsRef<Path>) -> Result<PathBuf> {
        let target = self.path.join(relative);
        ensure_parent(&target)?;
        fs::copy(from, &target).map_err(|source| BuildError::BuildDir {
            path: from.to_path_buf(),
            source,
        })?;
        Ok(target)
    }
}

impl Drop for BuildDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };

        if self.keep {
            let path = dir.keep();
            info!(dir = %path.display(), "kept build directory");
        } else if let Err(e) = dir.close() {
            warn!(dir = %self.path.display(), error = %e, "failed to remove build directory");
        }
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| BuildError::BuildDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}
