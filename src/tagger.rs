//! Attaches a transform and CRS to an upload and builds its overview pyramid.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::affine::AffineTransform;
use crate::error::{GeorefError, Result};
use crate::geometry::projection::Crs;
use crate::raster::{GeoRaster, Georef, Overview, RawImage, OVERVIEW_FACTORS};

/// Builder for tagging a [`RawImage`]
///
/// ```rust
/// use georefrs::{AffineTransform, Crs, RasterTagger, RawImage};
///
/// let image = RawImage::rgb8(4, 4, vec![0; 48]).unwrap();
/// let raster = RasterTagger::new(AffineTransform::north_up(10.0, 11.0, 0.25, 0.25), Crs::WGS84)
///     .tag(&image)
///     .unwrap();
/// assert_eq!(raster.overviews.len(), 4);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RasterTagger {
    transform: AffineTransform,
    crs: Crs,
    nodata: Option<u8>,
}

impl RasterTagger {
    #[must_use]
    pub fn new(transform: AffineTransform, crs: Crs) -> Self {
        Self {
            transform,
            crs,
            nodata: None,
        }
    }

    /// Treat pixels whose bands all equal `value` as transparent
    #[must_use]
    pub fn nodata(mut self, value: Option<u8>) -> Self {
        self.nodata = value;
        self
    }

    /// Tag without cancellation
    ///
    /// # Errors
    /// See [`RasterTagger::tag_with_cancel`].
    pub fn tag(&self, image: &RawImage) -> Result<GeoRaster> {
        self.tag_with_cancel(image, &CancellationToken::new())
    }

    /// Build a tagged raster, checking `cancel` between pyramid levels.
    ///
    /// The input pixel buffer is shared, not copied.
    ///
    /// # Errors
    /// - [`GeorefError::UnsupportedPixelFormat`] unless the image is 3-band 8-bit
    /// - [`GeorefError::DegenerateControlPoints`] if the transform is singular
    /// - [`GeorefError::Cancelled`] if `cancel` fires before the pyramid is complete
    pub fn tag_with_cancel(&self, image: &RawImage, cancel: &CancellationToken) -> Result<GeoRaster> {
        if !image.is_canonical() {
            return Err(GeorefError::UnsupportedPixelFormat(format!(
                "expected 3-band u8, got {} band(s) of {}",
                image.bands, image.sample_type
            )));
        }
        if self.transform.inverse().is_none() {
            return Err(GeorefError::DegenerateControlPoints {
                determinant: self.transform.determinant(),
            });
        }

        let mut overviews = Vec::with_capacity(OVERVIEW_FACTORS.len());
        for factor in OVERVIEW_FACTORS {
            if cancel.is_cancelled() {
                debug!(factor, "Tagging cancelled before pyramid level");
                return Err(GeorefError::Cancelled);
            }
            overviews.push(Overview::build(image, factor));
        }

        debug!(
            width = image.width,
            height = image.height,
            crs = %self.crs,
            levels = overviews.len(),
            "Tagged raster"
        );

        Ok(GeoRaster {
            image: image.clone(),
            georef: Some(Georef {
                transform: self.transform,
                crs: self.crs,
            }),
            overviews,
            nodata: self.nodata,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::raster::SampleType;

    fn image(width: usize, height: usize) -> RawImage {
        RawImage::rgb8(width, height, vec![128; width * height * 3]).unwrap()
    }

    fn transform() -> AffineTransform {
        AffineTransform::north_up(10.0, 11.0, 0.01, 0.01)
    }

    #[test]
    fn test_tag_builds_pyramid() {
        let raster = RasterTagger::new(transform(), Crs::WGS84).tag(&image(100, 60)).unwrap();
        let factors: Vec<usize> = raster.overviews.iter().map(|o| o.factor).collect();
        assert_eq!(factors, OVERVIEW_FACTORS.to_vec());
        assert_eq!(raster.overviews[3].width, 7);
        assert_eq!(raster.overviews[3].height, 4);
        assert_eq!(raster.crs(), Some(Crs::WGS84));
        assert!(raster.nodata.is_none());
    }

    #[test]
    fn test_tag_shares_pixels() {
        let upload = image(16, 16);
        let raster = RasterTagger::new(transform(), Crs::WGS84).tag(&upload).unwrap();
        assert!(Arc::ptr_eq(&upload.data, &raster.image.data));
    }

    #[test]
    fn test_unsupported_format() {
        let gray = RawImage::new(4, 4, 1, SampleType::U8, vec![0; 16]).unwrap();
        let err = RasterTagger::new(transform(), Crs::WGS84).tag(&gray).unwrap_err();
        assert!(matches!(err, GeorefError::UnsupportedPixelFormat(_)));
    }

    #[test]
    fn test_singular_transform_rejected() {
        let flat = AffineTransform::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        let err = RasterTagger::new(flat, Crs::WGS84).tag(&image(4, 4)).unwrap_err();
        assert!(matches!(err, GeorefError::DegenerateControlPoints { .. }));
    }

    #[test]
    fn test_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = RasterTagger::new(transform(), Crs::WGS84)
            .tag_with_cancel(&image(4, 4), &cancel)
            .unwrap_err();
        assert!(matches!(err, GeorefError::Cancelled));
    }
}
