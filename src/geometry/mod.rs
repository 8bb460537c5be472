//! Coordinate types shared by the tile slicer and the bounds calculator.

pub mod projection;

use serde::{Deserialize, Serialize};

use projection::{MAX_TILE_ZOOM, WEB_MERCATOR_HALF_EXTENT};

/// Bounding box in a coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    /// Create a new bounding box
    #[must_use]
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Create bounding box from XYZ tile coordinates (Web Mercator EPSG:3857).
    /// `None` above [`MAX_TILE_ZOOM`] or when `x`/`y` fall outside the zoom level.
    #[must_use]
    pub fn from_xyz(z: u32, x: u32, y: u32) -> Option<Self> {
        if z > MAX_TILE_ZOOM {
            return None;
        }
        let tiles = 1_u64 << z;
        if u64::from(x) >= tiles || u64::from(y) >= tiles {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = tiles as f64;
        let tile_size = 2.0 * WEB_MERCATOR_HALF_EXTENT / n;

        let minx = -WEB_MERCATOR_HALF_EXTENT + f64::from(x) * tile_size;
        let maxx = minx + tile_size;
        let maxy = WEB_MERCATOR_HALF_EXTENT - f64::from(y) * tile_size;
        let miny = maxy - tile_size;

        Some(Self { minx, miny, maxx, maxy })
    }

    /// Smallest box containing every point, or `None` for an empty input
    pub fn envelope<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut iter = points.into_iter();
        let (x0, y0) = iter.next()?;
        let mut bbox = Self::new(x0, y0, x0, y0);
        for (x, y) in iter {
            bbox.minx = bbox.minx.min(x);
            bbox.miny = bbox.miny.min(y);
            bbox.maxx = bbox.maxx.max(x);
            bbox.maxy = bbox.maxy.max(y);
        }
        Some(bbox)
    }

    /// Overlap test; boxes sharing only an edge count as intersecting
    #[must_use]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.maxx < other.minx
            || self.minx > other.maxx
            || self.maxy < other.miny
            || self.miny > other.maxy)
    }

    #[inline]
    #[must_use]
    pub fn west(&self) -> f64 {
        self.minx
    }

    #[inline]
    #[must_use]
    pub fn south(&self) -> f64 {
        self.miny
    }

    #[inline]
    #[must_use]
    pub fn east(&self) -> f64 {
        self.maxx
    }

    #[inline]
    #[must_use]
    pub fn north(&self) -> f64 {
        self.maxy
    }

    /// `[west, north, east, south]`, the ordering returned to API callers
    #[must_use]
    pub fn to_wnes(&self) -> [f64; 4] {
        [self.minx, self.maxy, self.maxx, self.miny]
    }
}
