//! Blob storage for uploads and raster containers.
//!
//! One backend is selected at startup and passed to the service by value.
//! Blobs are addressed by opaque keys of the form `<uuid>.<suffix>`, and a
//! key is never overwritten: saving always allocates a fresh one.
//!
//! # Example
//!
//! ```rust,no_run
//! use georefrs::storage::{FileStorage, LocalFileStorage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let storage = FileStorage::Local(LocalFileStorage::open("./temp")?);
//!
//!     let key = storage.save(b"hello".to_vec().into(), "txt").await?;
//!     assert_eq!(&storage.read(&key).await?[..], b"hello");
//!     storage.remove(&key).await?;
//!     Ok(())
//! }
//! ```

pub mod local;
pub mod s3;

pub use local::LocalFileStorage;
pub use s3::{S3Config, S3FileStorage};

use bytes::Bytes;
use uuid::Uuid;

/// Error type for storage operations
#[derive(Debug)]
pub enum StorageError {
    /// Local filesystem failure
    Io(std::io::Error),
    /// Object store failure
    ObjectStore(String),
    /// No blob under this key
    NotFound(String),
    /// Key is empty or contains path components
    InvalidKey(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ObjectStore(e) => write!(f, "Object store error: {e}"),
            Self::NotFound(key) => write!(f, "No blob stored under '{key}'"),
            Self::InvalidKey(key) => write!(f, "Invalid storage key '{key}'"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// The configured storage backend
pub enum FileStorage {
    Local(LocalFileStorage),
    S3(S3FileStorage),
}

impl FileStorage {
    /// Store `data` under a new key ending in `.{suffix}`
    ///
    /// # Errors
    /// Returns the backend error if the write fails.
    pub async fn save(&self, data: Bytes, suffix: &str) -> Result<String, StorageError> {
        let key = new_key(suffix);
        match self {
            Self::Local(s) => s.save(&key, data).await?,
            Self::S3(s) => s.save(&key, data).await?,
        }
        Ok(key)
    }

    /// # Errors
    /// Returns [`StorageError::NotFound`] if nothing is stored under `key`.
    pub async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        validate_key(key)?;
        match self {
            Self::Local(s) => s.read(key).await,
            Self::S3(s) => s.read(key).await,
        }
    }

    /// # Errors
    /// Returns [`StorageError::NotFound`] if nothing is stored under `key`.
    pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
        validate_key(key)?;
        match self {
            Self::Local(s) => s.remove(key).await,
            Self::S3(s) => s.remove(key).await,
        }
    }

    /// # Errors
    /// Returns the backend error if the lookup itself fails.
    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        match self {
            Self::Local(s) => s.exists(key).await,
            Self::S3(s) => s.exists(key).await,
        }
    }

    /// Short backend name for logs and the status endpoint
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::S3(_) => "aws",
        }
    }
}

fn new_key(suffix: &str) -> String {
    let suffix = suffix.trim_start_matches('.');
    format!("{}.{suffix}", Uuid::new_v4().simple())
}

/// Keys are flat file names: no separators, no parent references
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
