//! Parses containers produced by [`crate::geotiff_writer`] back into a
//! [`GeoRaster`].

use std::io::Cursor;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

use crate::affine::AffineTransform;
use crate::casting::downsampled_dim;
use crate::error::{GeorefError, Result};
use crate::geometry::projection::Crs;
use crate::geotiff_writer::{
    GDAL_NODATA, GEOGRAPHIC_TYPE_GEO_KEY, GEOTIFF_GEOKEYDIRECTORY, GEOTIFF_MODELPIXELSCALE,
    GEOTIFF_MODELTIEPOINT, GEOTIFF_MODELTRANSFORMATION, PROJECTED_CS_TYPE_GEO_KEY,
};
use crate::raster::{GeoRaster, Georef, Overview, RawImage, OVERVIEW_FACTORS};

fn corrupt(e: impl std::fmt::Display) -> GeorefError {
    GeorefError::CorruptContainer(e.to_string())
}

/// Decode a tagged raster container.
///
/// # Errors
/// Returns [`GeorefError::CorruptContainer`] if the bytes are not a 3-band
/// 8-bit GeoTIFF with a transform, a CRS key and the expected overview levels.
pub fn read_geotiff(bytes: &[u8]) -> Result<GeoRaster> {
    let mut decoder = Decoder::new(Cursor::new(bytes)).map_err(corrupt)?;

    let (width, height, pixels) = read_rgb8(&mut decoder)?;
    let transform = read_transform(&mut decoder)?;
    let crs = read_crs(&mut decoder)?;
    let nodata = read_nodata(&mut decoder)?;

    let mut overviews = Vec::with_capacity(OVERVIEW_FACTORS.len());
    while decoder.more_images() {
        decoder.next_image().map_err(corrupt)?;
        let Some(&factor) = OVERVIEW_FACTORS.get(overviews.len()) else {
            return Err(corrupt("more reduced-resolution images than pyramid levels"));
        };
        let (w, h, level_pixels) = read_rgb8(&mut decoder)?;
        if (w, h) != (downsampled_dim(width, factor), downsampled_dim(height, factor)) {
            return Err(corrupt(format!(
                "overview {} is {w}x{h}, expected factor {factor} of {width}x{height}",
                overviews.len()
            )));
        }
        overviews.push(Overview {
            factor,
            width: w,
            height: h,
            pixels: level_pixels,
        });
    }
    if overviews.len() != OVERVIEW_FACTORS.len() {
        return Err(corrupt(format!(
            "expected {} overview levels, found {}",
            OVERVIEW_FACTORS.len(),
            overviews.len()
        )));
    }

    debug!(width, height, %crs, "Decoded raster container");

    let image = RawImage::rgb8(width, height, pixels).map_err(corrupt)?;
    Ok(GeoRaster {
        image,
        georef: Some(Georef { transform, crs }),
        overviews,
        nodata,
    })
}

fn read_rgb8(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<(usize, usize, Vec<u8>)> {
    let color = decoder.colortype().map_err(corrupt)?;
    if color != ColorType::RGB(8) {
        return Err(corrupt(format!("unexpected color type {color:?}")));
    }
    let (w, h) = decoder.dimensions().map_err(corrupt)?;
    match decoder.read_image().map_err(corrupt)? {
        DecodingResult::U8(data) => Ok((w as usize, h as usize, data)),
        _ => Err(corrupt("expected 8-bit samples")),
    }
}

fn read_transform(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<AffineTransform> {
    if decoder
        .find_tag(Tag::Unknown(GEOTIFF_MODELTRANSFORMATION))
        .map_err(corrupt)?
        .is_some()
    {
        let matrix = decoder
            .get_tag_f64_vec(Tag::Unknown(GEOTIFF_MODELTRANSFORMATION))
            .map_err(corrupt)?;
        return AffineTransform::from_model_transformation(&matrix)
            .ok_or_else(|| corrupt("ModelTransformation needs 16 values"));
    }

    let scale = decoder
        .get_tag_f64_vec(Tag::Unknown(GEOTIFF_MODELPIXELSCALE))
        .map_err(|_| corrupt("missing ModelPixelScale and ModelTransformation"))?;
    let tiepoint = decoder
        .get_tag_f64_vec(Tag::Unknown(GEOTIFF_MODELTIEPOINT))
        .map_err(|_| corrupt("missing ModelTiepoint"))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(corrupt("truncated ModelPixelScale or ModelTiepoint"));
    }

    // Tiepoint [I, J, K, X, Y, Z] ties raster (I, J) to world (X, Y)
    let (sx, sy) = (scale[0], scale[1]);
    let origin_x = tiepoint[3] - tiepoint[0] * sx;
    let origin_y = tiepoint[4] + tiepoint[1] * sy;
    Ok(AffineTransform::north_up(origin_x, origin_y, sx, sy))
}

fn read_crs(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<Crs> {
    let keys = decoder
        .get_tag_u16_vec(Tag::Unknown(GEOTIFF_GEOKEYDIRECTORY))
        .map_err(|_| corrupt("missing GeoKeyDirectory"))?;

    // Skip the 4-value header, then walk [KeyID, Location, Count, Value] entries
    let code = keys
        .get(4..)
        .unwrap_or_default()
        .chunks_exact(4)
        .find(|entry| {
            (entry[0] == GEOGRAPHIC_TYPE_GEO_KEY || entry[0] == PROJECTED_CS_TYPE_GEO_KEY)
                && entry[1] == 0
        })
        .map(|entry| entry[3])
        .ok_or_else(|| corrupt("GeoKeyDirectory has no EPSG code"))?;

    Crs::from_epsg(code).ok_or_else(|| corrupt(format!("unknown EPSG code {code}")))
}

fn read_nodata(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<Option<u8>> {
    let Some(value) = decoder.find_tag(Tag::Unknown(GDAL_NODATA)).map_err(corrupt)? else {
        return Ok(None);
    };
    let text = value.into_string().map_err(corrupt)?;
    let text = text.trim_end_matches('\0').trim();
    text.parse::<u8>()
        .map(Some)
        .map_err(|_| corrupt(format!("nodata value '{text}' is not an 8-bit sample")))
}
