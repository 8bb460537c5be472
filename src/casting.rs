//! Numeric conversions between pixel space and floating point space.
//!
//! # Design Decisions
//!
//! ## Image Dimensions (`usize` ↔ `f64`)
//! Raster dimensions are converted to `f64` without checks: uploaded images
//! stay far below 2^53 pixels per side, which `f64` represents exactly.
//!
//! ## Pixel Coordinates (`f64` → `usize`)
//! Projected sample positions can be negative, NaN, or past the raster edge,
//! so float-to-index conversion always goes through a bounds check.

use std::convert::TryFrom;

/// Convert a `usize` to `u32`, failing on 64-bit overflow.
///
/// # Errors
/// Returns an error string if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32, String> {
    u32::try_from(value).map_err(|_| format!("Value {value} exceeds u32 maximum"))
}

/// Convert a float to a pixel index, returning `None` if out of bounds.
///
/// Negative values, NaN and values at or past `max_value` yield `None`.
#[inline]
#[must_use]
pub fn f64_to_pixel_index(value: f64, max_value: usize) -> Option<usize> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = value as usize;
    if index >= max_value {
        None
    } else {
        Some(index)
    }
}

/// Clamp a pixel index into `0..max_value`.
#[inline]
#[must_use]
pub fn clamp_index(value: usize, max_value: usize) -> usize {
    value.min(max_value.saturating_sub(1))
}

/// Dimension of a raster downsampled by `factor`, rounding up so that every
/// source pixel lands in some output pixel.
#[inline]
#[must_use]
pub fn downsampled_dim(dim: usize, factor: usize) -> usize {
    dim.div_ceil(factor).max(1)
}
