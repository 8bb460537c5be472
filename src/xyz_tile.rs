//! XYZ tile rendering from tagged rasters
//!
//! This module answers slippy-map `z/x/y` requests against a [`GeoRaster`].
//! It handles the zoom gate, the footprint check, overview selection,
//! nearest-neighbour sampling, alpha masking and PNG encoding.
//!
//! Only "no data here" situations produce a blank tile; failures while
//! sampling or encoding are returned as [`GeorefError::TileRenderFailure`].
//!
//! # Example
//!
//! ```rust
//! use georefrs::{AffineTransform, Crs, RasterTagger, RawImage};
//! use georefrs::xyz_tile::{TileRequest, TileSlicer};
//!
//! let image = RawImage::rgb8(16, 16, vec![90; 16 * 16 * 3]).unwrap();
//! let raster = RasterTagger::new(AffineTransform::north_up(10.0, 11.0, 0.0625, 0.0625), Crs::WGS84)
//!     .tag(&image)
//!     .unwrap();
//!
//! // Below the zoom gate every tile is blank
//! let tile = TileSlicer::new(&raster).render(TileRequest::new(4, 8, 7)).unwrap();
//! assert!(tile.is_blank());
//! ```

use png::ColorType;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::affine::AffineTransform;
use crate::bounds::RasterBounds;
use crate::casting::{clamp_index, f64_to_pixel_index, usize_to_u32};
use crate::error::{GeorefError, Result};
use crate::geometry::projection::CoordTransformer;
use crate::geometry::BoundingBox;
use crate::png_codec::encode_png;
use crate::raster::GeoRaster;

/// Output tile edge length in pixels
pub const TILE_SIZE: usize = 256;

/// Tiles below this zoom are always blank
pub const MIN_TILE_ZOOM: u32 = 5;

pub use crate::geometry::projection::MAX_TILE_ZOOM;

/// A slippy-map tile address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRequest {
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileRequest {
    #[must_use]
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// True when `x` and `y` are inside `[0, 2^z)` at a supported zoom
    #[must_use]
    pub fn is_addressable(&self) -> bool {
        if self.z > MAX_TILE_ZOOM {
            return false;
        }
        let n = 1_u64 << self.z;
        u64::from(self.x) < n && u64::from(self.y) < n
    }

    /// Web Mercator extent of the tile, `None` unless addressable
    #[must_use]
    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_xyz(self.z, self.x, self.y)
    }
}

impl std::fmt::Display for TileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/// Rendered RGBA tile
#[derive(Debug, Clone)]
pub struct TileData {
    /// Interleaved R,G,B,A samples, row-major
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

impl TileData {
    /// Fully transparent tile
    #[must_use]
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            pixels: vec![0; width * height * 4],
            width,
            height,
        }
    }

    /// True when every pixel has alpha 0
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.pixels.chunks_exact(4).all(|px| px[3] == 0)
    }

    /// Alpha channel value at `(col, row)`
    #[must_use]
    pub fn alpha(&self, col: usize, row: usize) -> u8 {
        self.pixels[(row * self.width + col) * 4 + 3]
    }

    /// Encode as PNG
    ///
    /// # Errors
    /// Returns [`GeorefError::TileRenderFailure`] if encoding fails.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let width = usize_to_u32(self.width).map_err(GeorefError::TileRenderFailure)?;
        let height = usize_to_u32(self.height).map_err(GeorefError::TileRenderFailure)?;
        encode_png(width, height, ColorType::Rgba, &self.pixels)
            .map_err(|e| GeorefError::TileRenderFailure(format!("PNG encoding failed: {e}")))
    }
}

/// Encoded transparent tile
///
/// # Errors
/// Returns [`GeorefError::TileRenderFailure`] if encoding fails.
pub fn blank_tile_png() -> Result<Vec<u8>> {
    TileData::blank(TILE_SIZE, TILE_SIZE).to_png()
}

/// Renders tiles from one raster
///
/// The raster is only read; any number of slicers may share it.
pub struct TileSlicer<'a> {
    raster: &'a GeoRaster,
    tile_size: usize,
}

impl<'a> TileSlicer<'a> {
    #[must_use]
    pub fn new(raster: &'a GeoRaster) -> Self {
        Self {
            raster,
            tile_size: TILE_SIZE,
        }
    }

    /// Render and encode a tile
    ///
    /// # Errors
    /// Returns [`GeorefError::TileRenderFailure`]; never fails for tiles
    /// without data.
    pub fn tile_png(&self, request: TileRequest) -> Result<Vec<u8>> {
        self.render(request)?.to_png()
    }

    /// Render a tile to RGBA pixels
    ///
    /// # Errors
    /// Returns [`GeorefError::TileRenderFailure`] if the raster's CRS cannot
    /// be projected into or its pixel buffers are inconsistent.
    pub fn render(&self, request: TileRequest) -> Result<TileData> {
        let size = self.tile_size;

        // Zoom gate
        if request.z < MIN_TILE_ZOOM {
            return Ok(TileData::blank(size, size));
        }
        let Some(extent) = request.bbox() else {
            return Ok(TileData::blank(size, size));
        };

        let Some(georef) = self.raster.georef else {
            return Ok(TileData::blank(size, size));
        };
        let inverse = georef.transform.inverse().ok_or_else(|| {
            GeorefError::TileRenderFailure("raster transform is not invertible".to_string())
        })?;
        let transformer =
            CoordTransformer::from_3857_to(georef.crs).map_err(GeorefError::TileRenderFailure)?;

        let res = (extent.maxx - extent.minx) / size as f64;
        let pixel_centre = |out_x: usize, out_y: usize| -> (f64, f64) {
            (
                extent.minx + (out_x as f64 + 0.5) * res,
                extent.maxy - (out_y as f64 + 0.5) * res,
            )
        };

        // Bounds check on a 3x3 grid of sample points
        let footprint = RasterBounds::from_transform(
            &georef.transform,
            self.raster.width(),
            self.raster.height(),
        )
        .bbox();
        let samples = [0, size / 2, size - 1];
        let mut grid = Vec::with_capacity(samples.len() * samples.len());
        for &sy in &samples {
            for &sx in &samples {
                let (mx, my) = pixel_centre(sx, sy);
                if let Ok(point) = transformer.transform(mx, my) {
                    grid.push(point);
                }
            }
        }
        let Some(tile_envelope) = BoundingBox::envelope(grid) else {
            return Ok(TileData::blank(size, size));
        };
        if !tile_envelope.intersects(&footprint) {
            trace!(tile = %request, "Tile outside raster footprint");
            return Ok(TileData::blank(size, size));
        }

        let overview_idx = self.select_overview(&transformer, &inverse, pixel_centre(size / 2, size / 2), res);
        let factor = overview_idx.map_or(1, |i| self.raster.overviews[i].factor);
        let (level_pixels, level_width, level_height) = self.raster.level(overview_idx);
        let bands = self.raster.bands();
        let (full_width, full_height) = (self.raster.width(), self.raster.height());
        let factor_f = factor as f64;

        let mut tile = TileData::blank(size, size);
        for out_y in 0..size {
            for out_x in 0..size {
                let (mx, my) = pixel_centre(out_x, out_y);
                let Ok((wx, wy)) = transformer.transform(mx, my) else {
                    continue;
                };
                let (px, py) = inverse.apply(wx, wy);
                if f64_to_pixel_index(px, full_width).is_none() || f64_to_pixel_index(py, full_height).is_none() {
                    continue;
                }

                let lx = f64_to_pixel_index(px / factor_f, level_width).unwrap_or(level_width);
                let ly = f64_to_pixel_index(py / factor_f, level_height).unwrap_or(level_height);
                let src = (clamp_index(ly, level_height) * level_width + clamp_index(lx, level_width)) * bands;
                let sample = level_pixels.get(src..src + bands).ok_or_else(|| {
                    GeorefError::TileRenderFailure(format!(
                        "pixel buffer too short for {level_width}x{level_height} level"
                    ))
                })?;

                if let Some(nodata) = self.raster.nodata {
                    if sample.iter().all(|&v| v == nodata) {
                        continue;
                    }
                }

                let dst = (out_y * size + out_x) * 4;
                tile.pixels[dst..dst + 3].copy_from_slice(&sample[..3]);
                tile.pixels[dst + 3] = 255;
            }
        }

        trace!(tile = %request, factor, "Rendered tile");
        Ok(tile)
    }

    /// Pick the level whose factor is closest (in log2) to the number of
    /// full-resolution pixels covered by one output pixel. `None` is full
    /// resolution; ties go to the finer level.
    fn select_overview(
        &self,
        transformer: &CoordTransformer,
        inverse: &AffineTransform,
        centre: (f64, f64),
        res: f64,
    ) -> Option<usize> {
        let to_pixel = |mx: f64, my: f64| {
            transformer
                .transform(mx, my)
                .ok()
                .map(|(wx, wy)| inverse.apply(wx, wy))
        };
        let (cx, cy) = centre;
        let (p0, px, py) = (to_pixel(cx, cy)?, to_pixel(cx + res, cy)?, to_pixel(cx, cy - res)?);
        let step = 0.5 * ((px.0 - p0.0).hypot(px.1 - p0.1) + (py.0 - p0.0).hypot(py.1 - p0.1));
        if !step.is_finite() || step <= 1.0 {
            return None;
        }

        let target = step.log2();
        let mut best: (Option<usize>, f64) = (None, target.abs());
        for (i, ovr) in self.raster.overviews.iter().enumerate() {
            let distance = ((ovr.factor as f64).log2() - target).abs();
            if distance < best.1 {
                best = (Some(i), distance);
            }
        }
        best.0
    }
}
