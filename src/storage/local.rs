//! Local filesystem storage.
//!
//! Blobs are flat files in one directory. Writes go to `<key>.partial` and
//! are renamed into place, so a reader never sees a half-written blob.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::StorageError;

/// Suffix of in-progress writes
const PARTIAL_SUFFIX: &str = "partial";

/// Storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Open (creating if needed) a storage directory and remove partial
    /// files left behind by an interrupted process.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let storage = Self { root };
        let swept = storage.sweep_partials();
        debug!(root = %storage.root.display(), swept, "Opened local storage");
        Ok(storage)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sweep_partials(&self) -> usize {
        let mut swept = 0;
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(std::result::Result::ok)
        {
            let path = entry.path();
            let is_partial = path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(PARTIAL_SUFFIX));
            if !is_partial || !entry.file_type().is_file() {
                continue;
            }
            match std::fs::remove_file(path) {
                Ok(()) => swept += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
            }
        }
        swept
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub(super) async fn save(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let target = self.path(key);
        let partial = self.path(&format!("{key}.{PARTIAL_SUFFIX}"));

        if let Err(e) = tokio::fs::write(&partial, &data).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e.into());
        }
        tokio::fs::rename(&partial, &target).await?;
        debug!(key, bytes = data.len(), "Saved blob");
        Ok(())
    }

    pub(super) async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn remove(&self, key: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path(key)).await {
            Ok(()) => {
                debug!(key, "Removed blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub(super) async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(tokio::fs::try_exists(self.path(key)).await?)
    }
}
