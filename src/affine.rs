//! Affine pixel → geographic transforms and the control point solver.
//!
//! The transform maps pixel `(col, row)` to `(x, y)`:
//!
//! ```text
//! x = a·col + b·row + c
//! y = d·col + e·row + f
//! ```
//!
//! Three non-collinear control points determine it exactly; more points are
//! fitted by least squares independently for the x and y channels.

use serde::{Deserialize, Serialize};

use crate::control_points::{ControlPointSet, MIN_CONTROL_POINTS};
use crate::error::{GeorefError, Result};

/// Six-coefficient affine transform
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    #[must_use]
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform from an origin and pixel size
    #[must_use]
    pub const fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, -pixel_height, origin_y)
    }

    /// Apply to a pixel position
    #[inline]
    #[must_use]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Determinant of the linear part
    #[inline]
    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Inverse transform (geographic → pixel), or `None` if singular
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Some(Self::new(
            ia,
            ib,
            -(ia * self.c + ib * self.f),
            id,
            ie,
            -(id * self.c + ie * self.f),
        ))
    }

    /// Coefficients in `[a, b, c, d, e, f]` order
    #[must_use]
    pub fn to_array(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }

    /// GeoTIFF `ModelTransformationTag` layout (row-major 4×4)
    #[must_use]
    pub fn to_model_transformation(&self) -> [f64; 16] {
        [
            self.a, self.b, 0.0, self.c,
            self.d, self.e, 0.0, self.f,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ]
    }

    /// Parse a `ModelTransformationTag` value
    #[must_use]
    pub fn from_model_transformation(m: &[f64]) -> Option<Self> {
        if m.len() < 16 {
            return None;
        }
        Some(Self::new(m[0], m[1], m[3], m[4], m[5], m[7]))
    }

    /// Pixel size along the column and row axes, in CRS units
    #[must_use]
    pub fn pixel_size(&self) -> (f64, f64) {
        (self.a.hypot(self.d), self.b.hypot(self.e))
    }
}

/// Result of fitting a transform to a control point set
#[derive(Debug, Clone, PartialEq)]
pub struct AffineSolution {
    pub transform: AffineTransform,
    /// Euclidean residual per point, in the order of the input set
    pub residuals: Vec<f64>,
}

impl AffineSolution {
    /// Sum of squared residuals over both channels
    #[must_use]
    pub fn sum_squared_residuals(&self) -> f64 {
        self.residuals.iter().map(|r| r * r).sum()
    }

    /// Root mean square residual
    #[must_use]
    pub fn rmse(&self) -> f64 {
        if self.residuals.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.residuals.len() as f64;
        (self.sum_squared_residuals() / n).sqrt()
    }

    /// Store residuals back onto the points for diagnostic display
    pub fn write_residuals(&self, points: &mut ControlPointSet) {
        for (p, r) in points.points.iter_mut().zip(&self.residuals) {
            p.error = Some(*r);
        }
    }
}

/// Fit an affine transform to a control point set.
///
/// Exactly three points are solved as a 3×3 linear system; more points are
/// solved by least squares. All arithmetic is `f64` and the summation order
/// follows the input order, so identical inputs give bit-identical output.
///
/// # Errors
/// Any failure from [`ControlPointSet::validate`].
pub fn solve(points: &ControlPointSet) -> Result<AffineSolution> {
    points.validate()?;

    let transform = if points.len() == MIN_CONTROL_POINTS {
        solve_exact(points)?
    } else {
        solve_least_squares(points)?
    };

    let residuals = points
        .iter()
        .map(|p| {
            let (col, row) = p.pixel();
            let (x, y) = transform.apply(col, row);
            (x - p.lng).hypot(y - p.lat)
        })
        .collect();

    Ok(AffineSolution {
        transform,
        residuals,
    })
}

/// Solve the exactly determined system for three points.
fn solve_exact(points: &ControlPointSet) -> Result<AffineTransform> {
    let mut m = [[0.0_f64; 3]; 3];
    let mut xs = [0.0_f64; 3];
    let mut ys = [0.0_f64; 3];
    for (i, p) in points.iter().enumerate() {
        let (col, row) = p.pixel();
        m[i] = [col, row, 1.0];
        xs[i] = p.lng;
        ys[i] = p.lat;
    }

    let [a, b, c] = solve3(m, xs)?;
    let [d, e, f] = solve3(m, ys)?;
    Ok(AffineTransform::new(a, b, c, d, e, f))
}

/// Least squares over the centred pixel coordinates.
///
/// Centring keeps the 2×2 normal matrix well conditioned when pixel indices
/// are large; the offset terms are recovered from the means.
fn solve_least_squares(points: &ControlPointSet) -> Result<AffineTransform> {
    #[allow(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    let mut mean = [0.0_f64; 4];
    for p in points.iter() {
        let (col, row) = p.pixel();
        mean[0] += col;
        mean[1] += row;
        mean[2] += p.lng;
        mean[3] += p.lat;
    }
    for m in &mut mean {
        *m /= n;
    }
    let [mc, mr, mx, my] = mean;

    let (mut scc, mut srr, mut scr) = (0.0, 0.0, 0.0);
    let (mut scx, mut srx, mut scy, mut sry) = (0.0, 0.0, 0.0, 0.0);
    for p in points.iter() {
        let (col, row) = p.pixel();
        let dc = col - mc;
        let dr = row - mr;
        let dx = p.lng - mx;
        let dy = p.lat - my;
        scc += dc * dc;
        srr += dr * dr;
        scr += dc * dr;
        scx += dc * dx;
        srx += dr * dx;
        scy += dc * dy;
        sry += dr * dy;
    }

    let det = scc * srr - scr * scr;
    if det == 0.0 || !det.is_finite() {
        return Err(GeorefError::DegenerateControlPoints { determinant: det });
    }

    let a = (srr * scx - scr * srx) / det;
    let b = (scc * srx - scr * scx) / det;
    let d = (srr * scy - scr * sry) / det;
    let e = (scc * sry - scr * scy) / det;
    let c = mx - a * mc - b * mr;
    let f = my - d * mc - e * mr;
    Ok(AffineTransform::new(a, b, c, d, e, f))
}

/// Gaussian elimination with partial pivoting
fn solve3(mut m: [[f64; 3]; 3], mut rhs: [f64; 3]) -> Result<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        if m[pivot][col] == 0.0 {
            return Err(GeorefError::DegenerateControlPoints { determinant: 0.0 });
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);

        for row in col + 1..3 {
            let factor = m[row][col] / m[col][col];
            for k in col..3 {
                m[row][k] -= factor * m[col][k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut out = [0.0_f64; 3];
    for row in (0..3).rev() {
        let mut acc = rhs[row];
        for k in row + 1..3 {
            acc -= m[row][k] * out[k];
        }
        out[row] = acc / m[row][row];
    }
    Ok(out)
}
