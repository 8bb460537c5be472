//! Process configuration, parsed once at startup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::storage::{FileStorage, LocalFileStorage, S3Config, S3FileStorage, StorageError};

const DEFAULT_CORS_ORIGINS: &str = "http://localhost,http://localhost:8080,http://localhost:3000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageKind {
    Local,
    Aws,
}

/// Server configuration. Every flag falls back to an environment variable.
#[derive(Debug, Clone, Parser)]
#[command(name = "georefrs", version, about = "Georeferencing and XYZ tile server")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "HOST_PORT", default_value_t = 8000)]
    pub port: u16,

    #[arg(short = 'M', long, env = "ENVIRONMENT", value_enum, default_value_t = Mode::Development)]
    pub mode: Mode,

    /// Comma separated list of allowed origins
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',', default_value = DEFAULT_CORS_ORIGINS)]
    pub cors_origins: Vec<String>,

    #[arg(long, env = "STORAGE_TYPE", value_enum, default_value_t = StorageKind::Local)]
    pub storage: StorageKind,

    /// Directory for local storage
    #[arg(long, env = "LOCAL_STORAGE_DIR", default_value = "./temp")]
    pub storage_dir: PathBuf,

    #[arg(long, env = "AWS_BUCKET_NAME")]
    pub aws_bucket: Option<String>,

    #[arg(long, env = "AWS_REGION_NAME", default_value = "us-east-1")]
    pub aws_region: String,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub aws_access_key_id: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub aws_secret_access_key: Option<String>,

    /// Custom endpoint for S3-compatible services
    #[arg(long, env = "AWS_ENDPOINT")]
    pub aws_endpoint: Option<String>,

    /// Memory budget for decoded rasters
    #[arg(long, env = "RASTER_CACHE_MB", default_value_t = 512)]
    pub raster_cache_mb: usize,

    /// How long a superseded raster container is kept for in-flight readers
    #[arg(long, env = "RETIRED_BLOB_GRACE_SECS", default_value_t = 30)]
    pub retired_blob_grace_secs: u64,

    /// Treat pixels whose bands all equal this value as transparent
    #[arg(long, env = "NODATA")]
    pub nodata: Option<u8>,
}

impl Config {
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn raster_cache_bytes(&self) -> usize {
        self.raster_cache_mb.saturating_mul(1024 * 1024)
    }

    #[must_use]
    pub fn retired_blob_grace(&self) -> Duration {
        Duration::from_secs(self.retired_blob_grace_secs)
    }

    /// Open the configured storage backend
    ///
    /// # Errors
    /// Returns [`StorageError`] if the local directory cannot be created, the
    /// bucket name is missing, or the S3 client cannot be built.
    pub fn build_storage(&self) -> Result<FileStorage, StorageError> {
        match self.storage {
            StorageKind::Local => Ok(FileStorage::Local(LocalFileStorage::open(&self.storage_dir)?)),
            StorageKind::Aws => {
                let bucket = self.aws_bucket.clone().ok_or_else(|| {
                    StorageError::ObjectStore("AWS_BUCKET_NAME is required for aws storage".to_string())
                })?;
                let config = S3Config {
                    bucket,
                    region: self.aws_region.clone(),
                    access_key_id: self.aws_access_key_id.clone(),
                    secret_access_key: self.aws_secret_access_key.clone(),
                    endpoint: self.aws_endpoint.clone(),
                };
                Ok(FileStorage::S3(S3FileStorage::new(&config)?))
            }
        }
    }
}
