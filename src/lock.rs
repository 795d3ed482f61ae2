//! Exclusive lock serializing runs that share an output directory

use crate::error::{ExportError, Result};
use fs4::tokio::AsyncFileExt;
use std::path::{Path, PathBuf};

/// Lock file name inside the output directory
pub const LOCK_FILE: &str = ".export.lock";

/// Held for the whole run; released when dropped
///
/// The scratch and verification keychains have fixed names, so two runs at
/// once would delete each other's keychains. The second run blocks here
/// until the first one finishes.
#[derive(Debug)]
pub struct RunLock {
    _file: tokio::fs::File,
    path: PathBuf,
}

impl RunLock {
    /// Create `dir` if needed and take the exclusive lock inside it.
    pub async fn acquire(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(LOCK_FILE);
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .await?;

        file.lock_exclusive()
            .map_err(|e| ExportError::Locked(format!("{}: {e}", path.display())))?;

        Ok(Self { _file: file, path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
