//! Scoped scratch space for a single operation.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::WORKSPACE_PREFIX;
use keycrypt_common::{Error, Result};

/// A uniquely named directory removed when dropped.
///
/// Every operation gets its own workspace, so concurrent operations on the
/// same destination never share intermediate files.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create a workspace inside `parent`.
    pub fn create_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)?;
        debug!(workspace = %dir.path().display(), "Workspace created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of `name` inside the workspace.
    pub fn join(&self, name: impl AsRef<Path>) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Create and return a subdirectory.
    pub fn subdir(&self, name: &str) -> Result<PathBuf> {
        let path = self.join(name);
        fs::create_dir(&path)?;
        Ok(path)
    }
}

/// Write `contents` to a file that must not exist yet.
///
/// # Errors
/// - `Conflict` if `path` already exists
pub(crate) fn write_new_file(path: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::from_exclusive_create(e, path.display()))?;
    if let Err(e) = file.write_all(contents).and_then(|()| file.sync_all()) {
        drop(file);
        if let Err(remove_err) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %remove_err, "Failed to remove partial file");
        }
        return Err(e.into());
    }
    Ok(())
}

/// Removes output files unless the operation commits.
#[derive(Debug, Default)]
pub struct OutputGuard {
    paths: Vec<PathBuf>,
    committed: bool,
}

impl OutputGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an output for removal on failure.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    /// Keep every tracked output.
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in self.paths.iter().rev() {
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else if path.exists() {
                fs::remove_file(path)
            } else {
                continue;
            };
            match removed {
                Ok(()) => debug!(path = %path.display(), "Removed partial output"),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove partial output")
                }
            }
        }
    }
}
