//! In-memory raster types: the untagged upload and the tagged [`GeoRaster`].

use std::sync::Arc;

use crate::affine::AffineTransform;
use crate::casting::downsampled_dim;
use crate::geometry::projection::Crs;

/// Downsample factors of the overview pyramid, finest first
pub const OVERVIEW_FACTORS: [usize; 4] = [2, 4, 8, 16];

/// Band count of the canonical input format
pub const CANONICAL_BANDS: usize = 3;

/// Sample data type of a pixel buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    F32,
}

impl SampleType {
    #[must_use]
    pub fn size_bytes(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::F32 => 4,
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::U8 => write!(f, "u8"),
            Self::U16 => write!(f, "u16"),
            Self::F32 => write!(f, "f32"),
        }
    }
}

/// Flat, interleaved pixel buffer without any geographic information
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub sample_type: SampleType,
    /// Row-major, band-interleaved samples. Shared so that re-tagging never
    /// copies the upload.
    pub data: Arc<Vec<u8>>,
}

impl RawImage {
    /// Wrap a buffer, checking that its length matches the declared shape.
    ///
    /// # Errors
    /// Returns a message describing the mismatch.
    pub fn new(
        width: usize,
        height: usize,
        bands: usize,
        sample_type: SampleType,
        data: Vec<u8>,
    ) -> Result<Self, String> {
        let expected = width * height * bands * sample_type.size_bytes();
        if width == 0 || height == 0 || bands == 0 {
            return Err(format!("empty image ({width}x{height}, {bands} bands)"));
        }
        if data.len() != expected {
            return Err(format!(
                "buffer holds {} bytes, {width}x{height}x{bands} {sample_type} needs {expected}",
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            bands,
            sample_type,
            data: Arc::new(data),
        })
    }

    /// 3-band 8-bit image
    ///
    /// # Errors
    /// Returns a message if the buffer length is not `width * height * 3`.
    pub fn rgb8(width: usize, height: usize, data: Vec<u8>) -> Result<Self, String> {
        Self::new(width, height, CANONICAL_BANDS, SampleType::U8, data)
    }

    /// True for the 3-band 8-bit layout the tagger accepts
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.bands == CANONICAL_BANDS && self.sample_type == SampleType::U8
    }
}

/// Transform and CRS attached to a tagged raster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Georef {
    pub transform: AffineTransform,
    pub crs: Crs,
}

/// One nearest-neighbour downsampled copy of the full-resolution pixels
#[derive(Debug, Clone)]
pub struct Overview {
    pub factor: usize,
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Overview {
    /// Build a level by copying the centre pixel of each `factor x factor` block
    #[must_use]
    pub fn build(image: &RawImage, factor: usize) -> Self {
        let bands = image.bands;
        let width = downsampled_dim(image.width, factor);
        let height = downsampled_dim(image.height, factor);
        let half = factor / 2;

        let mut pixels = Vec::with_capacity(width * height * bands);
        for r in 0..height {
            let src_row = (r * factor + half).min(image.height - 1);
            let row_start = src_row * image.width;
            for c in 0..width {
                let src_col = (c * factor + half).min(image.width - 1);
                let idx = (row_start + src_col) * bands;
                pixels.extend_from_slice(&image.data[idx..idx + bands]);
            }
        }

        Self {
            factor,
            width,
            height,
            pixels,
        }
    }
}

/// A raster that may carry a transform, a CRS and an overview pyramid.
///
/// Tagged rasters are immutable; a re-tag builds a new `GeoRaster` that
/// shares the pixel buffer of the old one.
#[derive(Debug, Clone)]
pub struct GeoRaster {
    pub image: RawImage,
    pub georef: Option<Georef>,
    /// Overview levels in [`OVERVIEW_FACTORS`] order; empty when untagged
    pub overviews: Vec<Overview>,
    /// Sample value treated as "no data" across all bands
    pub nodata: Option<u8>,
}

impl GeoRaster {
    /// Wrap an upload that has not been georeferenced yet
    #[must_use]
    pub fn untagged(image: RawImage) -> Self {
        Self {
            image,
            georef: None,
            overviews: Vec::new(),
            nodata: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> usize {
        self.image.width
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> usize {
        self.image.height
    }

    #[inline]
    #[must_use]
    pub fn bands(&self) -> usize {
        self.image.bands
    }

    #[must_use]
    pub fn is_tagged(&self) -> bool {
        self.georef.is_some()
    }

    #[must_use]
    pub fn transform(&self) -> Option<&AffineTransform> {
        self.georef.as_ref().map(|g| &g.transform)
    }

    #[must_use]
    pub fn crs(&self) -> Option<Crs> {
        self.georef.map(|g| g.crs)
    }

    /// Pixels and dimensions at a pyramid level; `None` is full resolution
    #[must_use]
    pub fn level(&self, overview_idx: Option<usize>) -> (&[u8], usize, usize) {
        match overview_idx.and_then(|i| self.overviews.get(i)) {
            Some(ovr) => (&ovr.pixels, ovr.width, ovr.height),
            None => (&self.image.data, self.image.width, self.image.height),
        }
    }

    /// Approximate heap footprint, used for the raster cache budget
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.image.data.len() + self.overviews.iter().map(|o| o.pixels.len()).sum::<usize>()
    }
}
