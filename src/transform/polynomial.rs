//! Polynomial warp used for lens and section distortion.
//!
//! Coordinates are normalized as `u = (x - cx) / s`, `v = (y - cy) / s` and
//! each output axis is a polynomial over the monomials `u^i v^j` with
//! `i + j <= order`, ordered by total degree and then by decreasing power
//! of `u`:
//!
//! ```text
//! 1, u, v, u², uv, v², u³, u²v, uv², v³, ...
//! ```

use crate::error::TransformError;
use crate::geometry::Point2;

/// Highest supported polynomial order.
pub const MAX_POLYNOMIAL_ORDER: usize = 4;

const NEWTON_MAX_ITERATIONS: usize = 50;
const NEWTON_TOLERANCE: f64 = 1e-10;

/// Number of monomials for a polynomial of the given order.
pub const fn monomial_count(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// A 2-D polynomial warp.
#[derive(Debug, Clone, PartialEq)]
pub struct PolynomialWarp {
    order: usize,
    center: Point2,
    scale: f64,
    x_coefficients: Vec<f64>,
    y_coefficients: Vec<f64>,
}

impl PolynomialWarp {
    /// Create a polynomial warp.
    ///
    /// # Errors
    ///
    /// Fails when the order is outside `1..=MAX_POLYNOMIAL_ORDER`, the
    /// coefficient vectors do not hold [`monomial_count`] entries, or the
    /// normalization scale is not a positive finite number.
    pub fn new(
        order: usize,
        center: Point2,
        scale: f64,
        x_coefficients: Vec<f64>,
        y_coefficients: Vec<f64>,
    ) -> Result<Self, TransformError> {
        if order == 0 || order > MAX_POLYNOMIAL_ORDER {
            return Err(TransformError::InvalidParameter(format!(
                "polynomial order {order}"
            )));
        }
        if !(scale.is_finite() && scale > 0.0) {
            return Err(TransformError::InvalidParameter(format!(
                "polynomial scale {scale}"
            )));
        }
        let expected = monomial_count(order);
        for coefficients in [&x_coefficients, &y_coefficients] {
            if coefficients.len() != expected {
                return Err(TransformError::ParameterCount {
                    tag: "polynomial",
                    expected: format!("{expected} coefficients per axis"),
                    actual: coefficients.len(),
                });
            }
        }
        Ok(Self {
            order,
            center,
            scale,
            x_coefficients,
            y_coefficients,
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    #[inline]
    fn normalize(&self, p: Point2) -> (f64, f64) {
        ((p.x - self.center.x) / self.scale, (p.y - self.center.y) / self.scale)
    }

    /// Evaluate both axes and their partial derivatives with respect to `x`
    /// and `y`.
    fn evaluate(&self, p: Point2) -> (Point2, [[f64; 2]; 2]) {
        let (u, v) = self.normalize(p);

        let mut value = [0.0; 2];
        let mut jacobian = [[0.0; 2]; 2];
        let mut k = 0;
        for degree in 0..=self.order {
            for j in 0..=degree {
                let i = degree - j;
                let m = u.powi(i as i32) * v.powi(j as i32);
                let dm_du = if i > 0 {
                    i as f64 * u.powi(i as i32 - 1) * v.powi(j as i32)
                } else {
                    0.0
                };
                let dm_dv = if j > 0 {
                    j as f64 * u.powi(i as i32) * v.powi(j as i32 - 1)
                } else {
                    0.0
                };
                for (axis, coefficients) in [&self.x_coefficients, &self.y_coefficients]
                    .into_iter()
                    .enumerate()
                {
                    let a = coefficients[k];
                    value[axis] += a * m;
                    jacobian[axis][0] += a * dm_du / self.scale;
                    jacobian[axis][1] += a * dm_dv / self.scale;
                }
                k += 1;
            }
        }
        (Point2::new(value[0], value[1]), jacobian)
    }

    pub fn apply(&self, p: Point2) -> Point2 {
        self.evaluate(p).0
    }

    /// Solve `apply(q) = p` for `q` by Newton iteration, seeded by the inverse
    /// of the linear part.
    pub fn inverse_apply(&self, p: Point2) -> Point2 {
        if !p.is_finite() {
            return Point2::unmapped();
        }
        let mut q = match self.linear_seed(p) {
            Some(seed) => seed,
            None => return Point2::unmapped(),
        };

        let tolerance = NEWTON_TOLERANCE * self.scale.max(1.0);
        for _ in 0..NEWTON_MAX_ITERATIONS {
            let (value, j) = self.evaluate(q);
            let rx = value.x - p.x;
            let ry = value.y - p.y;
            if rx.abs() < tolerance && ry.abs() < tolerance {
                return q;
            }
            let det = j[0][0] * j[1][1] - j[0][1] * j[1][0];
            if det.abs() < f64::EPSILON {
                return Point2::unmapped();
            }
            q.x -= (j[1][1] * rx - j[0][1] * ry) / det;
            q.y -= (-j[1][0] * rx + j[0][0] * ry) / det;
            if !q.is_finite() {
                return Point2::unmapped();
            }
        }
        Point2::unmapped()
    }

    /// Invert the constant and first-degree terms only.
    fn linear_seed(&self, p: Point2) -> Option<Point2> {
        let (c0x, c1x, c2x) = (
            self.x_coefficients[0],
            self.x_coefficients[1],
            self.x_coefficients[2],
        );
        let (c0y, c1y, c2y) = (
            self.y_coefficients[0],
            self.y_coefficients[1],
            self.y_coefficients[2],
        );
        let det = c1x * c2y - c2x * c1y;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let rx = p.x - c0x;
        let ry = p.y - c0y;
        let u = (c2y * rx - c2x * ry) / det;
        let v = (-c1y * rx + c1x * ry) / det;
        Some(Point2::new(
            u * self.scale + self.center.x,
            v * self.scale + self.center.y,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Near-identity quadratic warp centered on a 100x100 tile.
    fn barrel() -> PolynomialWarp {
        let c = Point2::new(50.0, 50.0);
        // x = 50 + 50u + 0.8u² ; y = 50 + 50v + 0.5uv
        PolynomialWarp::new(
            2,
            c,
            50.0,
            vec![50.0, 50.0, 0.0, 0.8, 0.0, 0.0],
            vec![50.0, 0.0, 50.0, 0.0, 0.5, 0.0],
        )
        .unwrap()
    }

    #[test]
    fn test_monomial_count() {
        assert_eq!(monomial_count(1), 3);
        assert_eq!(monomial_count(2), 6);
        assert_eq!(monomial_count(4), 15);
    }

    #[test]
    fn test_first_order_is_affine() {
        let warp = PolynomialWarp::new(
            1,
            Point2::ORIGIN,
            1.0,
            vec![5.0, 1.0, 0.0],
            vec![-2.0, 0.0, 1.0],
        )
        .unwrap();
        let p = warp.apply(Point2::new(3.0, 4.0));
        assert_eq!(p, Point2::new(8.0, 2.0));
    }

    #[test]
    fn test_newton_inverse_round_trip() {
        let warp = barrel();
        for &(x, y) in &[(0.0, 0.0), (10.0, 90.0), (50.0, 50.0), (99.0, 1.0)] {
            let p = Point2::new(x, y);
            let q = warp.inverse_apply(warp.apply(p));
            assert!((q.x - x).abs() < 1e-6, "x {} vs {}", q.x, x);
            assert!((q.y - y).abs() < 1e-6, "y {} vs {}", q.y, y);
        }
    }

    #[test]
    fn test_rejects_bad_coefficient_count() {
        let result = PolynomialWarp::new(2, Point2::ORIGIN, 1.0, vec![0.0; 3], vec![0.0; 6]);
        assert!(matches!(
            result,
            Err(TransformError::ParameterCount { actual: 3, .. })
        ));
    }

    #[test]
    fn test_rejects_order_out_of_range() {
        assert!(PolynomialWarp::new(0, Point2::ORIGIN, 1.0, vec![0.0], vec![0.0]).is_err());
        assert!(PolynomialWarp::new(5, Point2::ORIGIN, 1.0, vec![0.0; 21], vec![0.0; 21]).is_err());
    }
}
