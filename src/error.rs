//! Error types for georeferencing and tile serving.
//!
//! Validation and solve failures are deterministic for a given input and are
//! reported to the caller as-is. Tile rendering failures are the only errors
//! the HTTP boundary treats as retryable server errors.

use crate::storage::StorageError;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, GeorefError>;

/// Every failure the engine and its orchestration layer can report
#[derive(Debug)]
pub enum GeorefError {
    /// Fewer than three control points were supplied
    InsufficientControlPoints { required: usize, got: usize },
    /// The pixel-space configuration of the control points is (near) collinear
    DegenerateControlPoints { determinant: f64 },
    /// A control point lacks finite pixel or geographic coordinates
    MalformedPoint(String),
    /// CRS string could not be parsed or is not in the definitions database
    InvalidCrs(String),
    /// Input pixels are not 3-band 8-bit
    UnsupportedPixelFormat(String),
    /// Bounds or tiles were requested for a raster without a transform
    RasterNotTagged,
    /// Decode/encode failure while producing a tile
    TileRenderFailure(String),
    /// The raster container could not be written
    EncodingFailure(String),
    /// The persisted raster container could not be parsed
    CorruptContainer(String),
    /// A tag operation was cancelled between pyramid levels
    Cancelled,
    /// Blob storage failure
    Storage(StorageError),
    /// No project with this id
    ProjectNotFound(u64),
    /// No point with this sequence number in the project
    PointNotFound { project: u64, point: u32 },
    /// The project has no uploaded image yet
    ImageMissing(u64),
}

impl GeorefError {
    /// True for precondition failures caused by the request itself.
    ///
    /// These are deterministic given the same input and must not be retried.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientControlPoints { .. }
                | Self::DegenerateControlPoints { .. }
                | Self::MalformedPoint(_)
                | Self::InvalidCrs(_)
                | Self::UnsupportedPixelFormat(_)
                | Self::RasterNotTagged
        )
    }

    /// True when the addressed resource does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ProjectNotFound(_)
                | Self::PointNotFound { .. }
                | Self::ImageMissing(_)
                | Self::Storage(StorageError::NotFound(_))
        )
    }
}

impl std::fmt::Display for GeorefError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientControlPoints { required, got } => {
                write!(f, "Insufficient control points: need at least {required}, got {got}")
            }
            Self::DegenerateControlPoints { determinant } => write!(
                f,
                "Degenerate control points: pixel positions are collinear (determinant {determinant:e})"
            ),
            Self::MalformedPoint(e) => write!(f, "Malformed control point: {e}"),
            Self::InvalidCrs(e) => write!(f, "Invalid CRS: {e}"),
            Self::UnsupportedPixelFormat(e) => write!(f, "Unsupported pixel format: {e}"),
            Self::RasterNotTagged => write!(f, "Raster has not been georeferenced"),
            Self::TileRenderFailure(e) => write!(f, "Tile render failure: {e}"),
            Self::EncodingFailure(e) => write!(f, "Raster encoding failure: {e}"),
            Self::CorruptContainer(e) => write!(f, "Corrupt raster container: {e}"),
            Self::Cancelled => write!(f, "Operation cancelled"),
            Self::Storage(e) => write!(f, "Storage error: {e}"),
            Self::ProjectNotFound(id) => write!(f, "Project {id} not found"),
            Self::PointNotFound { project, point } => {
                write!(f, "Point {point} not found in project {project}")
            }
            Self::ImageMissing(id) => write!(f, "Project {id} has no uploaded image"),
        }
    }
}

impl std::error::Error for GeorefError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StorageError> for GeorefError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}
