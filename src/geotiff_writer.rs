//! GeoTIFF writer for tagged rasters
//!
//! A tagged [`GeoRaster`] is persisted as a single GeoTIFF: the full-resolution
//! RGB image in the first IFD carrying the transform and CRS keys, followed by
//! one reduced-resolution IFD per overview level. It uses pure Rust libraries
//! (no GDAL dependency).
//!
//! # Example
//!
//! ```rust
//! use georefrs::{AffineTransform, Crs, RasterTagger, RawImage};
//! use georefrs::geotiff_writer::GeoTiffCompression;
//!
//! let image = RawImage::rgb8(8, 8, vec![200; 8 * 8 * 3]).unwrap();
//! let raster = RasterTagger::new(AffineTransform::north_up(10.0, 11.0, 0.1, 0.1), Crs::WGS84)
//!     .tag(&image)
//!     .unwrap();
//!
//! let bytes = raster
//!     .geotiff_writer()
//!     .compression(GeoTiffCompression::Lzw)
//!     .to_bytes()
//!     .unwrap();
//! assert_eq!(&bytes[..2], b"II");
//! ```

use std::io::{Cursor, Seek, Write};

use tiff::encoder::colortype::RGB8;
use tiff::encoder::{Compression, TiffEncoder};
use tiff::tags::Tag;

use crate::affine::AffineTransform;
use crate::casting::usize_to_u32;
use crate::error::GeorefError;
use crate::geometry::projection::Crs;
use crate::raster::{GeoRaster, Georef};

// GeoTIFF Tag IDs (not in standard tiff crate)
pub(crate) const GEOTIFF_MODELPIXELSCALE: u16 = 33550;
pub(crate) const GEOTIFF_MODELTIEPOINT: u16 = 33922;
pub(crate) const GEOTIFF_MODELTRANSFORMATION: u16 = 34264;
pub(crate) const GEOTIFF_GEOKEYDIRECTORY: u16 = 34735;
pub(crate) const GEOTIFF_GEOASCIIPARAMS: u16 = 34737;
pub(crate) const GDAL_NODATA: u16 = 42113;

// GeoKey IDs
pub(crate) const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
pub(crate) const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// NewSubfileType value marking a reduced-resolution image
const SUBFILE_REDUCED_RESOLUTION: u32 = 1;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default)]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression - better compression, slower
    #[default]
    Deflate,
}

/// Error type for GeoTIFF writing operations
#[derive(Debug)]
pub enum GeoTiffWriteError {
    /// I/O error during file operations
    Io(std::io::Error),
    /// TIFF encoding error
    TiffEncode(String),
    /// Invalid raster data
    InvalidData(String),
}

impl std::fmt::Display for GeoTiffWriteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::TiffEncode(e) => write!(f, "TIFF encoding error: {e}"),
            Self::InvalidData(e) => write!(f, "Invalid data: {e}"),
        }
    }
}

impl std::error::Error for GeoTiffWriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for GeoTiffWriteError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tiff::TiffError> for GeoTiffWriteError {
    fn from(e: tiff::TiffError) -> Self {
        Self::TiffEncode(e.to_string())
    }
}

impl From<GeoTiffWriteError> for GeorefError {
    fn from(e: GeoTiffWriteError) -> Self {
        Self::EncodingFailure(e.to_string())
    }
}

/// Builder for configuring GeoTIFF output
pub struct GeoTiffWriter<'a> {
    raster: &'a GeoRaster,
    compression: GeoTiffCompression,
}

impl<'a> GeoTiffWriter<'a> {
    /// Create a new GeoTIFF writer for a tagged raster
    #[must_use]
    pub fn new(raster: &'a GeoRaster) -> Self {
        Self {
            raster,
            compression: GeoTiffCompression::default(),
        }
    }

    /// Set the compression method
    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Encode into an in-memory buffer
    pub fn to_bytes(self) -> Result<Vec<u8>, GeoTiffWriteError> {
        let mut buffer = Cursor::new(Vec::new());
        self.write_to(&mut buffer)?;
        Ok(buffer.into_inner())
    }

    /// Write to any writer that implements Write + Seek
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<(), GeoTiffWriteError> {
        let raster = self.raster;

        let Some(georef) = raster.georef else {
            return Err(GeoTiffWriteError::InvalidData(
                "Raster has not been georeferenced".to_string(),
            ));
        };

        if !raster.image.is_canonical() {
            return Err(GeoTiffWriteError::InvalidData(format!(
                "Expected 3-band u8 pixels, got {} band(s) of {}",
                raster.image.bands, raster.image.sample_type
            )));
        }

        // Convert our compression enum to tiff crate's enum
        let compression = match self.compression {
            GeoTiffCompression::None => Compression::Uncompressed,
            GeoTiffCompression::Lzw => Compression::Lzw,
            GeoTiffCompression::Deflate => Compression::Deflate(tiff::encoder::DeflateLevel::Fast),
        };

        let mut encoder = TiffEncoder::new(writer)?.with_compression(compression);

        let width = usize_to_u32(raster.width()).map_err(GeoTiffWriteError::InvalidData)?;
        let height = usize_to_u32(raster.height()).map_err(GeoTiffWriteError::InvalidData)?;
        let mut image = encoder.new_image::<RGB8>(width, height)?;
        self.write_geotiff_tags(image.encoder(), &georef)?;
        image.write_data(&raster.image.data)?;

        for overview in &raster.overviews {
            let width = usize_to_u32(overview.width).map_err(GeoTiffWriteError::InvalidData)?;
            let height = usize_to_u32(overview.height).map_err(GeoTiffWriteError::InvalidData)?;
            let mut image = encoder.new_image::<RGB8>(width, height)?;
            image
                .encoder()
                .write_tag(Tag::NewSubfileType, SUBFILE_REDUCED_RESOLUTION)?;
            image.write_data(&overview.pixels)?;
        }

        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: tiff::encoder::TiffKind>(
        &self,
        dir: &mut tiff::encoder::DirectoryEncoder<W, K>,
        georef: &Georef,
    ) -> Result<(), GeoTiffWriteError> {
        let t = &georef.transform;

        if is_north_up(t) {
            // North-up: ModelPixelScale [ScaleX, ScaleY, ScaleZ] plus a tiepoint
            // tying pixel (0, 0) to world coordinate (c, f)
            let pixel_scale = [t.a, -t.e, 0.0];
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELPIXELSCALE), pixel_scale.as_slice())?;
            let tiepoint = [0.0, 0.0, 0.0, t.c, t.f, 0.0];
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELTIEPOINT), tiepoint.as_slice())?;
        } else {
            let matrix = t.to_model_transformation();
            dir.write_tag(Tag::Unknown(GEOTIFF_MODELTRANSFORMATION), matrix.as_slice())?;
        }

        let geokeys = build_geokey_directory(georef.crs);
        dir.write_tag(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY), geokeys.as_slice())?;

        // GeoAsciiParams entries are pipe-terminated
        let ascii_params = format!("{}|", georef.crs);
        dir.write_tag(Tag::Unknown(GEOTIFF_GEOASCIIPARAMS), ascii_params.as_str())?;

        if let Some(nodata) = self.raster.nodata {
            dir.write_tag(Tag::Unknown(GDAL_NODATA), nodata.to_string().as_str())?;
        }

        Ok(())
    }
}

/// GeoKeyDirectory for a CRS:
/// `[KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
///   KeyID1, TIFFTagLocation1, Count1, Value_Offset1, ...]`
pub(crate) fn build_geokey_directory(crs: Crs) -> Vec<u16> {
    let is_geographic = crs.is_geographic();

    let mut keys = vec![
        1, // KeyDirectoryVersion
        1, // KeyRevision
        0, // MinorRevision
        3, // NumberOfKeys
    ];

    // GTModelTypeGeoKey
    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0, // TIFFTagLocation = 0 means value is in Value_Offset
        1, // Count
        if is_geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);

    // GTRasterTypeGeoKey
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);

    // Geographic or Projected CRS type
    if is_geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, crs.epsg()]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, crs.epsg()]);
    }

    keys
}

/// Whether `t` is stored as pixel scale + tiepoint rather than a full matrix
#[must_use]
pub(crate) fn is_north_up(t: &AffineTransform) -> bool {
    t.b == 0.0 && t.d == 0.0
}

impl GeoRaster {
    /// Get a GeoTIFF writer builder for more control over output options.
    #[must_use]
    pub fn geotiff_writer(&self) -> GeoTiffWriter<'_> {
        GeoTiffWriter::new(self)
    }

    /// Write this raster to bytes as a GeoTIFF with the default compression.
    ///
    /// Useful for serving GeoTIFFs over HTTP or storing as a blob.
    pub fn to_geotiff_bytes(&self) -> Result<Vec<u8>, GeoTiffWriteError> {
        GeoTiffWriter::new(self).to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RawImage;
    use crate::tagger::RasterTagger;

    fn create_test_raster(crs: u16, transform: AffineTransform) -> GeoRaster {
        let (width, height) = (64, 48);
        let pixels: Vec<u8> = (0..width * height * 3).map(|i| (i % 256) as u8).collect();
        let image = RawImage::rgb8(width, height, pixels).unwrap();
        RasterTagger::new(transform, Crs::from_epsg(crs).unwrap())
            .tag(&image)
            .unwrap()
    }

    fn utm_raster() -> GeoRaster {
        create_test_raster(32610, AffineTransform::north_up(500000.0, 4010000.0, 10.0, 10.0))
    }

    #[test]
    fn test_write_rgb_geotiff() {
        let bytes = utm_raster().to_geotiff_bytes().unwrap();

        // Check TIFF magic bytes
        assert!(bytes.len() > 8);
        assert!(bytes[0] == b'I' && bytes[1] == b'I' || bytes[0] == b'M' && bytes[1] == b'M');
    }

    #[test]
    fn test_write_all_compressions() {
        let raster = utm_raster();
        for compression in [
            GeoTiffCompression::None,
            GeoTiffCompression::Lzw,
            GeoTiffCompression::Deflate,
        ] {
            let bytes = raster.geotiff_writer().compression(compression).to_bytes().unwrap();
            assert!(bytes.len() > 8, "{compression:?}");
        }
    }

    #[test]
    fn test_geokey_directory() {
        let cases = [
            (32610, MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY),
            (3857, MODEL_TYPE_PROJECTED, PROJECTED_CS_TYPE_GEO_KEY),
            (4326, MODEL_TYPE_GEOGRAPHIC, GEOGRAPHIC_TYPE_GEO_KEY),
        ];
        for (epsg, model, crs_key) in cases {
            let keys = build_geokey_directory(Crs::from_epsg(epsg).unwrap());
            // Header: version 1.1.0 with three keys
            assert_eq!(&keys[..4], &[1, 1, 0, 3]);
            assert_eq!((keys[4], keys[7]), (GT_MODEL_TYPE_GEO_KEY, model), "EPSG:{epsg}");
            assert_eq!((keys[12], keys[15]), (crs_key, epsg), "EPSG:{epsg}");
        }
    }

    #[test]
    fn test_untagged_raster_error() {
        let image = RawImage::rgb8(2, 2, vec![0; 12]).unwrap();
        let result = GeoRaster::untagged(image).to_geotiff_bytes();
        assert!(matches!(result, Err(GeoTiffWriteError::InvalidData(_))));
    }

    #[test]
    fn test_overviews_written_as_reduced_ifds() {
        use tiff::decoder::Decoder;

        let raster = utm_raster();
        let bytes = raster.to_geotiff_bytes().unwrap();

        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        assert_eq!(decoder.dimensions().unwrap(), (64, 48));

        let mut dims = Vec::new();
        while decoder.more_images() {
            decoder.next_image().unwrap();
            let subfile = decoder.get_tag_u32(Tag::NewSubfileType).unwrap();
            assert_eq!(subfile, SUBFILE_REDUCED_RESOLUTION);
            dims.push(decoder.dimensions().unwrap());
        }
        assert_eq!(dims, vec![(32, 24), (16, 12), (8, 6), (4, 3)]);
    }

    #[test]
    fn test_rotated_transform_uses_model_transformation() {
        use tiff::decoder::Decoder;

        let rotated = AffineTransform::new(0.01, 0.002, 10.0, 0.001, -0.01, 11.0);
        assert!(!is_north_up(&rotated));
        let bytes = create_test_raster(4326, rotated).to_geotiff_bytes().unwrap();

        let mut decoder = Decoder::new(Cursor::new(bytes)).unwrap();
        let matrix = decoder
            .get_tag_f64_vec(Tag::Unknown(GEOTIFF_MODELTRANSFORMATION))
            .unwrap();
        assert_eq!(AffineTransform::from_model_transformation(&matrix), Some(rotated));
    }
}
