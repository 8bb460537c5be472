//! Coordinate reference systems and Web Mercator tile math.
//!
//! CRS definitions come from the `crs-definitions` database and projections
//! are evaluated with `proj4rs`, so no system PROJ or GDAL is required. The
//! two conversions every tile request needs (EPSG:3857 ↔ EPSG:4326) use the
//! closed-form spherical Mercator formulas instead.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4, PI};
use std::fmt;

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use crate::error::{GeorefError, Result};

/// Semi-major axis used by Web Mercator
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the width of the Web Mercator square, in metres
pub const WEB_MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// Latitude limit of the Web Mercator square
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// CRS used when the caller does not supply one
pub const DEFAULT_CRS: &str = "EPSG:4326";

/// Deepest zoom that addresses a tile
pub const MAX_TILE_ZOOM: u32 = 30;

const WGS84: u16 = 4326;
const WEB_MERCATOR: u16 = 3857;

/// A coordinate reference system identified by its EPSG code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u16,
}

impl Crs {
    /// WGS84 geographic coordinates
    pub const WGS84: Crs = Crs { epsg: WGS84 };

    /// Parse an optional CRS string.
    ///
    /// `None` or a blank string yields [`DEFAULT_CRS`]. Anything else must be
    /// `EPSG:<code>` with a code present in the definitions database.
    ///
    /// # Errors
    /// Returns [`GeorefError::InvalidCrs`] for malformed or unknown codes;
    /// malformed input never silently becomes the default.
    pub fn parse(input: Option<&str>) -> Result<Self> {
        let Some(raw) = input.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::WGS84);
        };

        let code = raw
            .split_once(':')
            .filter(|(authority, _)| authority.eq_ignore_ascii_case("EPSG"))
            .map(|(_, code)| code.trim())
            .ok_or_else(|| GeorefError::InvalidCrs(format!("'{raw}' is not of the form EPSG:<code>")))?;

        let epsg: u16 = code
            .parse()
            .map_err(|_| GeorefError::InvalidCrs(format!("'{raw}' has a non-numeric EPSG code")))?;

        if get_proj_string(epsg).is_none() {
            return Err(GeorefError::InvalidCrs(format!(
                "EPSG:{epsg} is not in the crs-definitions database"
            )));
        }
        Ok(Self { epsg })
    }

    /// Build from a numeric code, checking it against the database
    #[must_use]
    pub fn from_epsg(epsg: u16) -> Option<Self> {
        get_proj_string(epsg).map(|_| Self { epsg })
    }

    #[inline]
    #[must_use]
    pub fn epsg(&self) -> u16 {
        self.epsg
    }

    /// PROJ4 definition string
    #[must_use]
    pub fn proj_string(&self) -> Option<&'static str> {
        get_proj_string(self.epsg)
    }

    #[must_use]
    pub fn is_geographic(&self) -> bool {
        is_geographic_crs(self.epsg)
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::WGS84
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Get PROJ4 string for an EPSG code using the crs-definitions database
#[inline]
#[must_use]
pub fn get_proj_string(epsg: u16) -> Option<&'static str> {
    crs_definitions::from_code(epsg).map(|def| def.proj4)
}

/// Check if an EPSG code represents a geographic (lon/lat) CRS
#[inline]
#[must_use]
pub fn is_geographic_crs(epsg: u16) -> bool {
    if let Some(proj_str) = get_proj_string(epsg) {
        proj_str.contains("+proj=longlat")
    } else {
        // Fallback: assume 4326 and similar are geographic
        (4000..5000).contains(&epsg)
    }
}

/// Longitude/latitude (degrees) to Web Mercator metres.
///
/// Latitude is clamped to the Mercator square.
#[inline]
#[must_use]
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

/// Web Mercator metres to longitude/latitude (degrees)
#[inline]
#[must_use]
pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - FRAC_PI_2).to_degrees();
    (lon, lat)
}

/// XYZ tile containing a longitude/latitude at zoom `z`, or `None` above
/// [`MAX_TILE_ZOOM`]
#[must_use]
pub fn tile_for_lon_lat(lon: f64, lat: f64, z: u32) -> Option<(u32, u32)> {
    if z > MAX_TILE_ZOOM {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = (1_u64 << z) as f64;
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let fx = (lon + 180.0) / 360.0 * n;
    let fy = (1.0 - lat.tan().asinh() / PI) / 2.0 * n;
    let max = n - 1.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let tile = (fx.floor().clamp(0.0, max) as u32, fy.floor().clamp(0.0, max) as u32);
    Some(tile)
}

enum TransformKind {
    Identity,
    MercatorToLonLat,
    Proj {
        source: Box<Proj>,
        target: Box<Proj>,
        target_is_geographic: bool,
    },
}

/// Transforms Web Mercator (EPSG:3857) coordinates into a raster's CRS
pub struct CoordTransformer {
    kind: TransformKind,
}

impl CoordTransformer {
    /// Create a transformer from EPSG:3857 (Web Mercator) to another CRS
    ///
    /// # Errors
    /// Returns an error if either projection definition cannot be loaded.
    pub fn from_3857_to(target: Crs) -> std::result::Result<Self, String> {
        let kind = match target.epsg() {
            WEB_MERCATOR => TransformKind::Identity,
            WGS84 => TransformKind::MercatorToLonLat,
            epsg => {
                let source_str = get_proj_string(WEB_MERCATOR).ok_or("EPSG:3857 not supported")?;
                let target_str = get_proj_string(epsg)
                    .ok_or_else(|| format!("EPSG:{epsg} not supported"))?;

                let source = Proj::from_proj_string(source_str)
                    .map_err(|e| format!("Invalid source projection: {e:?}"))?;
                let target_proj = Proj::from_proj_string(target_str)
                    .map_err(|e| format!("Invalid target projection EPSG:{epsg}: {e:?}"))?;

                TransformKind::Proj {
                    source: Box::new(source),
                    target: Box::new(target_proj),
                    target_is_geographic: target.is_geographic(),
                }
            }
        };
        Ok(Self { kind })
    }

    /// Transform coordinates from EPSG:3857 to the target CRS
    ///
    /// # Errors
    /// Returns an error if `proj4rs` cannot transform the point.
    pub fn transform(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), String> {
        match &self.kind {
            TransformKind::Identity => Ok((x, y)),
            TransformKind::MercatorToLonLat => Ok(mercator_to_lon_lat(x, y)),
            TransformKind::Proj {
                source,
                target,
                target_is_geographic,
            } => {
                let mut point = (x, y, 0.0);
                transform(source, target, &mut point)
                    .map_err(|e| format!("Transform failed: {e:?}"))?;

                // proj4rs returns radians for geographic targets
                if *target_is_geographic {
                    Ok((point.0.to_degrees(), point.1.to_degrees()))
                } else {
                    Ok((point.0, point.1))
                }
            }
        }
    }
}
