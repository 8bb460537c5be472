//! Geographic footprint of a tagged raster.
//!
//! Corners are always reported in the order upper-left `(0, 0)`,
//! upper-right `(width, 0)`, lower-right `(width, height)`, lower-left
//! `(0, height)`, each as `(lng, lat)` in the raster CRS.

use serde::Serialize;

use crate::affine::AffineTransform;
use crate::error::{GeorefError, Result};
use crate::geometry::BoundingBox;
use crate::raster::GeoRaster;

/// Corner coordinates of a raster footprint
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RasterBounds {
    /// `[upper_left, upper_right, lower_right, lower_left]`
    pub corners: [(f64, f64); 4],
}

impl RasterBounds {
    /// Apply `transform` to the four pixel-corner positions of a
    /// `width x height` raster
    #[must_use]
    pub fn from_transform(transform: &AffineTransform, width: usize, height: usize) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f64, height as f64);
        Self {
            corners: [
                transform.apply(0.0, 0.0),
                transform.apply(w, 0.0),
                transform.apply(w, h),
                transform.apply(0.0, h),
            ],
        }
    }

    #[must_use]
    pub fn upper_left(&self) -> (f64, f64) {
        self.corners[0]
    }

    #[must_use]
    pub fn upper_right(&self) -> (f64, f64) {
        self.corners[1]
    }

    #[must_use]
    pub fn lower_right(&self) -> (f64, f64) {
        self.corners[2]
    }

    #[must_use]
    pub fn lower_left(&self) -> (f64, f64) {
        self.corners[3]
    }

    /// Axis-aligned envelope of the corners; for rotated rasters this is
    /// larger than the footprint itself
    #[must_use]
    pub fn bbox(&self) -> BoundingBox {
        let [(x0, y0), rest @ ..] = self.corners;
        rest.iter().fold(BoundingBox::new(x0, y0, x0, y0), |b, &(x, y)| {
            BoundingBox::new(b.minx.min(x), b.miny.min(y), b.maxx.max(x), b.maxy.max(y))
        })
    }

    /// `[west, north, east, south]`
    #[must_use]
    pub fn to_wnes(&self) -> [f64; 4] {
        self.bbox().to_wnes()
    }
}

/// Compute the footprint of a tagged raster.
///
/// # Errors
/// Returns [`GeorefError::RasterNotTagged`] if the raster has no transform.
pub fn bounds(raster: &GeoRaster) -> Result<RasterBounds> {
    let transform = raster.transform().ok_or(GeorefError::RasterNotTagged)?;
    Ok(RasterBounds::from_transform(transform, raster.width(), raster.height()))
}
