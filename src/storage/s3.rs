//! S3 storage via `object_store`.

use std::sync::Arc;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::debug;

use super::StorageError;

/// Connection settings for an S3 bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO, etc.)
    pub endpoint: Option<String>,
}

/// Storage backed by an S3 bucket
pub struct S3FileStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

fn object_store_error(key: &str, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::NotFound(key.to_string()),
        other => StorageError::ObjectStore(other.to_string()),
    }
}

impl S3FileStorage {
    /// Build a client for the configured bucket.
    ///
    /// Credentials not given in `config` are taken from the environment.
    ///
    /// # Errors
    /// Returns [`StorageError::ObjectStore`] if the client cannot be built.
    pub fn new(config: &S3Config) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);
        if let Some(key) = &config.access_key_id {
            builder = builder.with_access_key_id(key);
        }
        if let Some(secret) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret);
        }
        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint).with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ObjectStore(e.to_string()))?;
        debug!(bucket = %config.bucket, region = %config.region, "Created S3 storage");

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// Wrap an existing store (e.g. `object_store::memory::InMemory`)
    #[must_use]
    pub fn with_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub(super) async fn save(&self, key: &str, data: Bytes) -> Result<(), StorageError> {
        let len = data.len();
        self.store
            .put(&Path::from(key), PutPayload::from(data))
            .await
            .map_err(|e| object_store_error(key, e))?;
        debug!(bucket = %self.bucket, key, bytes = len, "Saved blob");
        Ok(())
    }

    pub(super) async fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        let result = self
            .store
            .get(&Path::from(key))
            .await
            .map_err(|e| object_store_error(key, e))?;
        result.bytes().await.map_err(|e| object_store_error(key, e))
    }

    pub(super) async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = Path::from(key);
        // S3 deletes are idempotent; check first so a missing key reports NotFound
        self.store
            .head(&path)
            .await
            .map_err(|e| object_store_error(key, e))?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| object_store_error(key, e))?;
        debug!(bucket = %self.bucket, key, "Removed blob");
        Ok(())
    }

    pub(super) async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::ObjectStore(e.to_string())),
        }
    }
}
