//! PNG encode/decode for tiles and uploads.

use std::io::Cursor;

use png::{BitDepth, ColorType, Transformations};

use crate::error::{GeorefError, Result};
use crate::raster::{RawImage, SampleType};

/// Largest upload accepted for decoding, in pixels
pub const MAX_UPLOAD_PIXELS: u64 = 1 << 26;

/// Encode 8-bit pixels as PNG
///
/// # Errors
/// Returns the encoder error if the buffer does not match the dimensions.
pub fn encode_png(
    width: u32,
    height: u32,
    color: ColorType,
    data: &[u8],
) -> std::result::Result<Vec<u8>, png::EncodingError> {
    let mut out = Vec::new();
    let mut encoder = png::Encoder::new(&mut out, width, height);
    encoder.set_color(color);
    encoder.set_depth(BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(data)?;
    writer.finish()?;
    Ok(out)
}

/// Decode an uploaded PNG into a [`RawImage`] without any colour conversion.
///
/// # Errors
/// - [`GeorefError::UnsupportedPixelFormat`] unless the PNG is 8-bit RGB
///   (no alpha, no palette); other formats must be normalised upstream
/// - [`GeorefError::UnsupportedPixelFormat`] if the bytes are not a PNG
/// - [`GeorefError::UnsupportedPixelFormat`] if the header declares more than
///   [`MAX_UPLOAD_PIXELS`] pixels; nothing is allocated for such an image
pub fn decode_png_rgb8(bytes: &[u8]) -> Result<RawImage> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(Transformations::IDENTITY);
    let mut reader = decoder
        .read_info()
        .map_err(|e| GeorefError::UnsupportedPixelFormat(format!("not a readable PNG: {e}")))?;

    let info = reader.info();
    let (width, height) = (info.width as usize, info.height as usize);
    if info.color_type != ColorType::Rgb || info.bit_depth != BitDepth::Eight {
        return Err(GeorefError::UnsupportedPixelFormat(format!(
            "expected 8-bit RGB PNG, got {:?} at {:?}",
            info.color_type, info.bit_depth
        )));
    }

    let pixels = u64::from(info.width) * u64::from(info.height);
    if pixels > MAX_UPLOAD_PIXELS {
        return Err(GeorefError::UnsupportedPixelFormat(format!(
            "{width}x{height} exceeds the {MAX_UPLOAD_PIXELS} pixel upload limit"
        )));
    }
    let len = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| GeorefError::UnsupportedPixelFormat(format!("{width}x{height} is too large")))?;

    let mut buf = vec![0; len];
    reader
        .next_frame(&mut buf)
        .map_err(|e| GeorefError::UnsupportedPixelFormat(format!("truncated PNG: {e}")))?;

    RawImage::new(width, height, 3, SampleType::U8, buf).map_err(GeorefError::UnsupportedPixelFormat)
}
