//! Target directory handling.
//!
//! Downloaded artifacts are the only state kept between runs: a file named
//! after a (dataset, year) pair marks that pair as done.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Suffix Chrome gives a download until it completes.
pub const PARTIAL_DOWNLOAD_SUFFIX: &str = "crdownload";

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Invalid path pattern: {0}")]
    InvalidPattern(#[from] glob::PatternError),
}

/// Configuration for storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub target_dir: PathBuf,
}

impl StorageConfig {
    pub fn new(target_dir: PathBuf) -> Self {
        Self { target_dir }
    }

    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.target_dir.join(filename)
    }

    /// Whether the artifact for `filename` is already on disk.
    pub fn artifact_exists(&self, filename: &str) -> bool {
        artifact_exists(&self.target_dir, filename)
    }

    /// Create the target directory if it is missing.
    pub fn ensure_target_dir(&self) -> Result<(), StorageError> {
        if self.target_dir.exists() && !self.target_dir.is_dir() {
            return Err(StorageError::NotADirectory(self.target_dir.clone()));
        }
        std::fs::create_dir_all(&self.target_dir)?;
        Ok(())
    }

    /// In-progress or abandoned browser downloads left in the target directory.
    pub fn partial_downloads(&self) -> Result<Vec<PathBuf>, StorageError> {
        let pattern = self
            .target_dir
            .join(format!("*.{}", PARTIAL_DOWNLOAD_SUFFIX));
        let mut found = Vec::new();
        for entry in glob::glob(&pattern.to_string_lossy())? {
            match entry {
                Ok(path) => found.push(path),
                Err(e) => warn!("Unreadable entry while scanning {:?}: {}", self.target_dir, e),
            }
        }
        found.sort();
        Ok(found)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}

/// Existence check used as the idempotency gate.
///
/// Never fails: a missing or unreadable directory means "not there".
/// Content is not inspected, so a truncated file still counts as present.
pub fn artifact_exists(target_dir: &Path, filename: &str) -> bool {
    target_dir.join(filename).try_exists().unwrap_or(false)
}

/// A download has finished once the artifact exists and Chrome's
/// in-progress file for it is gone.
pub fn download_finished(target_dir: &Path, filename: &str) -> bool {
    let partial = format!("{}.{}", filename, PARTIAL_DOWNLOAD_SUFFIX);
    artifact_exists(target_dir, filename) && !artifact_exists(target_dir, &partial)
}
