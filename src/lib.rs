#![doc = include_str!("../README.md")]
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`control_points`]: Control point records and validation
//! - [`affine`]: Affine transform fitting via [`solve`]
//! - [`tagger`]: Transform + CRS tagging and overview pyramid via [`RasterTagger`]
//! - [`xyz_tile`]: XYZ tile rendering with [`TileSlicer`]
//! - [`bounds`](mod@bounds): Corner coordinates of a tagged raster
//! - [`geometry`]: Bounding boxes, CRS parsing and projections
//! - [`geotiff_writer`] / [`geotiff_reader`]: The persisted raster container
//! - [`raster_cache`]: LRU cache of decoded rasters
//! - [`storage`]: Local and S3 blob storage
//! - [`service`]: Project orchestration used by the HTTP [`server`]

// ============================================================================
// Public modules
// ============================================================================

pub mod affine;
pub mod bounds;
pub mod casting;
pub mod cleanup;
pub mod config;
pub mod control_points;
pub mod error;
pub mod geometry;
pub mod geotiff_reader;
pub mod geotiff_writer;
pub mod png_codec;
pub mod project;
pub mod raster;
pub mod raster_cache;
pub mod registry;
pub mod server;
pub mod service;
pub mod storage;
pub mod tagger;
pub mod xyz_tile;

// ============================================================================
// Errors
// ============================================================================

pub use error::{GeorefError, Result};

// ============================================================================
// Georeferencing Engine
// ============================================================================
// Primary API: solve(&points) -> RasterTagger::new(..).tag(&image)

pub use control_points::{ControlPoint, ControlPointInput, ControlPointSet};
pub use affine::{solve, AffineSolution, AffineTransform};
pub use raster::{GeoRaster, RawImage, SampleType};
pub use tagger::RasterTagger;

// ============================================================================
// Tiles & Bounds
// ============================================================================
// Primary API: TileSlicer::new(&raster).tile_png(TileRequest::new(z, x, y))

pub use xyz_tile::{
    TileData,
    TileRequest,
    TileSlicer,
};
pub use bounds::{bounds, RasterBounds};

// ============================================================================
// Geometry & Projections
// ============================================================================

pub use geometry::BoundingBox;
pub use geometry::projection::{
    Crs,
    CoordTransformer,
    lon_lat_to_mercator,
    mercator_to_lon_lat,
    get_proj_string,
    is_geographic_crs,
};

// ============================================================================
// Raster Container
// ============================================================================

pub use geotiff_writer::{
    GeoTiffCompression,
    GeoTiffWriteError,
    GeoTiffWriter,
};
pub use geotiff_reader::read_geotiff;

// ============================================================================
// Storage & Service
// ============================================================================

pub use raster_cache::RasterCache;
pub use storage::{FileStorage, LocalFileStorage, S3Config, S3FileStorage, StorageError};
pub use service::{GeorefService, ServiceOptions};
