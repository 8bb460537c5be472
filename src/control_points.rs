//! Ground control points and their validation.
//!
//! A [`ControlPoint`] ties a pixel position in the uploaded image to a
//! geographic coordinate. A [`ControlPointSet`] can only be solved into an
//! affine transform once it has at least three points whose pixel positions
//! are not collinear.

use serde::{Deserialize, Serialize};

use crate::error::{GeorefError, Result};

/// Minimum number of points that determines an affine transform
pub const MIN_CONTROL_POINTS: usize = 3;

/// Relative tolerance on the pixel scatter determinant below which the
/// configuration is treated as collinear
pub const COLLINEARITY_TOLERANCE: f64 = 1e-10;

/// A single pixel ↔ geographic correspondence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Sequence number, unique within the owning set
    pub seq: u32,
    /// Pixel column
    pub col: u32,
    /// Pixel row
    pub row: u32,
    /// Longitude (or x in the target CRS)
    pub lng: f64,
    /// Latitude (or y in the target CRS)
    pub lat: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Distance between the fitted and the given geographic position,
    /// populated after a solve
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,
}

impl ControlPoint {
    #[must_use]
    pub fn new(seq: u32, col: u32, row: u32, lng: f64, lat: f64) -> Self {
        Self {
            seq,
            col,
            row,
            lng,
            lat,
            name: None,
            description: None,
            error: None,
        }
    }

    /// Pixel position as floats
    #[inline]
    #[must_use]
    pub fn pixel(&self) -> (f64, f64) {
        (f64::from(self.col), f64::from(self.row))
    }
}

/// Control point as it arrives from a caller, before any field is trusted.
///
/// Every coordinate is optional so that a missing value is reported as
/// [`GeorefError::MalformedPoint`] instead of a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlPointInput {
    pub col: Option<i64>,
    pub row: Option<i64>,
    pub lng: Option<f64>,
    pub lat: Option<f64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ControlPointInput {
    /// Check the fields and build a point with the given sequence number.
    ///
    /// # Errors
    /// Returns [`GeorefError::MalformedPoint`] if a coordinate is missing,
    /// not finite, or a pixel coordinate is negative.
    pub fn into_point(self, seq: u32) -> Result<ControlPoint> {
        let col = pixel_coord("col", self.col)?;
        let row = pixel_coord("row", self.row)?;
        let lng = geo_coord("lng", self.lng)?;
        let lat = geo_coord("lat", self.lat)?;
        Ok(ControlPoint {
            seq,
            col,
            row,
            lng,
            lat,
            name: self.name,
            description: self.description,
            error: None,
        })
    }
}

fn pixel_coord(field: &str, value: Option<i64>) -> Result<u32> {
    let value = value.ok_or_else(|| GeorefError::MalformedPoint(format!("missing {field}")))?;
    u32::try_from(value)
        .map_err(|_| GeorefError::MalformedPoint(format!("{field} must be a non-negative pixel index, got {value}")))
}

fn geo_coord(field: &str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(GeorefError::MalformedPoint(format!("{field} is not finite ({v})"))),
        None => Err(GeorefError::MalformedPoint(format!("missing {field}"))),
    }
}

/// Ordered collection of control points belonging to one raster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ControlPointSet {
    pub points: Vec<ControlPoint>,
}

impl ControlPointSet {
    #[must_use]
    pub fn new(points: Vec<ControlPoint>) -> Self {
        Self { points }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlPoint> {
        self.points.iter()
    }

    /// Check that the set can be solved into a unique affine transform.
    ///
    /// Pure function over the points; no side effects.
    ///
    /// # Errors
    /// - [`GeorefError::MalformedPoint`] if a geographic coordinate is not finite
    /// - [`GeorefError::InsufficientControlPoints`] with fewer than three points
    /// - [`GeorefError::DegenerateControlPoints`] if pixel positions are collinear
    pub fn validate(&self) -> Result<()> {
        for p in &self.points {
            if !p.lng.is_finite() || !p.lat.is_finite() {
                return Err(GeorefError::MalformedPoint(format!(
                    "point {} has non-finite geographic coordinates ({}, {})",
                    p.seq, p.lng, p.lat
                )));
            }
        }

        if self.points.len() < MIN_CONTROL_POINTS {
            return Err(GeorefError::InsufficientControlPoints {
                required: MIN_CONTROL_POINTS,
                got: self.points.len(),
            });
        }

        let (det, trace) = self.pixel_scatter();
        if trace <= 0.0 || det <= COLLINEARITY_TOLERANCE * trace * trace {
            return Err(GeorefError::DegenerateControlPoints { determinant: det });
        }
        Ok(())
    }

    /// Determinant and trace of the centred pixel scatter matrix.
    ///
    /// The determinant is zero exactly when every pixel position lies on one
    /// line (or all coincide).
    fn pixel_scatter(&self) -> (f64, f64) {
        #[allow(clippy::cast_precision_loss)]
        let n = self.points.len() as f64;
        let (sum_c, sum_r) = self
            .points
            .iter()
            .map(ControlPoint::pixel)
            .fold((0.0, 0.0), |(sc, sr), (c, r)| (sc + c, sr + r));
        let (mean_c, mean_r) = (sum_c / n, sum_r / n);

        let (mut scc, mut srr, mut scr) = (0.0, 0.0, 0.0);
        for (c, r) in self.points.iter().map(ControlPoint::pixel) {
            let dc = c - mean_c;
            let dr = r - mean_r;
            scc += dc * dc;
            srr += dr * dr;
            scr += dc * dr;
        }
        (scc * srr - scr * scr, scc + srr)
    }
}

impl From<Vec<ControlPoint>> for ControlPointSet {
    fn from(points: Vec<ControlPoint>) -> Self {
        Self::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(points: &[(u32, u32, f64, f64)]) -> ControlPointSet {
        points
            .iter()
            .enumerate()
            .map(|(i, &(c, r, x, y))| ControlPoint::new(i as u32 + 1, c, r, x, y))
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn test_valid_triangle() {
        let s = set(&[(0, 0, 10.0, 11.0), (100, 0, 11.0, 11.0), (0, 100, 10.0, 10.0)]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_too_few_points() {
        let s = set(&[(0, 0, 10.0, 11.0), (100, 100, 11.0, 10.0)]);
        match s.validate() {
            Err(GeorefError::InsufficientControlPoints { required, got }) => {
                assert_eq!(required, 3);
                assert_eq!(got, 2);
            }
            other => panic!("expected InsufficientControlPoints, got {other:?}"),
        }
    }

    #[test]
    fn test_collinear_points() {
        let s = set(&[(0, 0, 0.0, 0.0), (10, 0, 1.0, 0.0), (20, 0, 2.0, 0.0)]);
        assert!(matches!(
            s.validate(),
            Err(GeorefError::DegenerateControlPoints { .. })
        ));
    }

    #[test]
    fn test_diagonal_collinear_many_points() {
        let s = set(&[
            (0, 0, 0.0, 0.0),
            (5, 5, 1.0, 1.0),
            (10, 10, 2.0, 2.0),
            (40, 40, 3.0, 3.0),
        ]);
        assert!(matches!(
            s.validate(),
            Err(GeorefError::DegenerateControlPoints { .. })
        ));
    }

    #[test]
    fn test_coincident_points() {
        let s = set(&[(7, 7, 0.0, 0.0), (7, 7, 1.0, 0.0), (7, 7, 2.0, 0.0)]);
        assert!(matches!(
            s.validate(),
            Err(GeorefError::DegenerateControlPoints { .. })
        ));
    }

    #[test]
    fn test_non_finite_point() {
        let s = set(&[(0, 0, f64::NAN, 0.0), (10, 0, 1.0, 0.0), (0, 10, 2.0, 0.0)]);
        assert!(matches!(s.validate(), Err(GeorefError::MalformedPoint(_))));
    }

    #[test]
    fn test_input_missing_field() {
        let input = ControlPointInput {
            col: Some(1),
            row: None,
            lng: Some(1.0),
            lat: Some(2.0),
            ..Default::default()
        };
        let err = input.into_point(1).unwrap_err();
        assert!(err.to_string().contains("missing row"));
    }

    #[test]
    fn test_input_negative_pixel() {
        let input = ControlPointInput {
            col: Some(-3),
            row: Some(0),
            lng: Some(1.0),
            lat: Some(2.0),
            ..Default::default()
        };
        assert!(matches!(input.into_point(1), Err(GeorefError::MalformedPoint(_))));
    }

    #[test]
    fn test_input_from_json() {
        let input: ControlPointInput =
            serde_json::from_str(r#"{"col": 4, "row": 5, "lng": 10.5, "lat": 59.9, "name": "church"}"#)
                .unwrap();
        let point = input.into_point(7).unwrap();
        assert_eq!(point.seq, 7);
        assert_eq!((point.col, point.row), (4, 5));
        assert_eq!(point.name.as_deref(), Some("church"));
        assert!(point.error.is_none());
    }
}
