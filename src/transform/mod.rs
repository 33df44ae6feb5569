//! Geometric transforms between a local image frame and a common frame.
//!
//! Every transform maps a point expressed in the physical coordinates of a
//! source image ("local") into the physical coordinates of the frame it is
//! registered against ("target"):
//!
//! ```text
//!   local ──apply()──────────▶ target
//!   local ◀──inverse_apply()── target
//! ```
//!
//! Compositing and resampling walk the output grid, so the hot path is
//! [`Transform::inverse_apply`]. Linear variants invert in closed form;
//! [`PolynomialWarp`] inverts by Newton iteration and yields
//! [`Point2::unmapped`] when it fails to converge.
//!
//! A [`Transform::Cascade`] applies its elements left to right. An empty
//! cascade is the identity.

mod polynomial;
mod text;

pub use polynomial::{monomial_count, PolynomialWarp, MAX_POLYNOMIAL_ORDER};
pub use text::parse_transform;

use crate::error::TransformError;
use crate::geometry::{BoundingBox, Point2};

/// Number of samples per edge when bounding a non-linear transform.
const EDGE_SAMPLES: usize = 32;

/// Determinants smaller than this are treated as singular.
const SINGULAR_EPSILON: f64 = 1e-12;

// =============================================================================
// Affine Matrix
// =============================================================================

/// Row-major 2x3 matrix: `x' = a*x + b*y + tx`, `y' = c*x + d*y + ty`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineMatrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineMatrix {
    pub const IDENTITY: AffineMatrix = AffineMatrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    #[inline]
    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    #[inline]
    pub fn apply(&self, p: Point2) -> Point2 {
        Point2::new(
            self.a * p.x + self.b * p.y + self.tx,
            self.c * p.x + self.d * p.y + self.ty,
        )
    }

    /// Closed-form inverse.
    pub fn inverse(&self) -> Result<AffineMatrix, TransformError> {
        let det = self.determinant();
        if det.abs() < SINGULAR_EPSILON {
            return Err(TransformError::Singular { determinant: det });
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Ok(AffineMatrix {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }
}

// =============================================================================
// Transform
// =============================================================================

/// A mapping from a local image frame into a target frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Identity,

    Translation {
        dx: f64,
        dy: f64,
    },

    /// Rotation by `angle` radians about `center`, followed by `translation`.
    Rigid {
        angle: f64,
        center: Point2,
        translation: Point2,
    },

    /// General affine map. Construction through [`Transform::affine`]
    /// rejects singular matrices.
    Affine(AffineMatrix),

    Polynomial(PolynomialWarp),

    /// Elements applied in list order.
    Cascade(Vec<Transform>),

    /// Swaps `apply` and `inverse_apply` of the wrapped transform.
    Inverse(Box<Transform>),
}

impl Transform {
    pub fn translation(dx: f64, dy: f64) -> Self {
        Transform::Translation { dx, dy }
    }

    pub fn rigid(angle: f64, center: Point2, translation: Point2) -> Self {
        Transform::Rigid {
            angle,
            center,
            translation,
        }
    }

    pub fn affine(matrix: AffineMatrix) -> Result<Self, TransformError> {
        let det = matrix.determinant();
        if det.abs() < SINGULAR_EPSILON || !det.is_finite() {
            return Err(TransformError::Singular { determinant: det });
        }
        Ok(Transform::Affine(matrix))
    }

    /// Compose transforms in application order.
    ///
    /// An empty list yields the identity, a single element is returned as-is.
    pub fn cascade(mut transforms: Vec<Transform>) -> Self {
        match transforms.len() {
            0 => Transform::Identity,
            1 => transforms.remove(0),
            _ => Transform::Cascade(transforms),
        }
    }

    /// Short type name used in logs and summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            Transform::Identity => "identity",
            Transform::Translation { .. } => "translation",
            Transform::Rigid { .. } => "rigid",
            Transform::Affine(_) => "affine",
            Transform::Polynomial(_) => "polynomial",
            Transform::Cascade(_) => "cascade",
            Transform::Inverse(_) => "inverse",
        }
    }

    /// True when the transform maps straight lines to straight lines.
    pub fn is_linear(&self) -> bool {
        match self {
            Transform::Polynomial(warp) => warp.order() <= 1,
            Transform::Cascade(items) => items.iter().all(Transform::is_linear),
            Transform::Inverse(inner) => inner.is_linear(),
            _ => true,
        }
    }

    /// Map a local point into the target frame.
    pub fn apply(&self, p: Point2) -> Point2 {
        match self {
            Transform::Identity => p,
            Transform::Translation { dx, dy } => Point2::new(p.x + dx, p.y + dy),
            Transform::Rigid {
                angle,
                center,
                translation,
            } => {
                let (sin, cos) = angle.sin_cos();
                let x = p.x - center.x;
                let y = p.y - center.y;
                Point2::new(
                    cos * x - sin * y + center.x + translation.x,
                    sin * x + cos * y + center.y + translation.y,
                )
            }
            Transform::Affine(m) => m.apply(p),
            Transform::Polynomial(warp) => warp.apply(p),
            Transform::Cascade(items) => items.iter().fold(p, |acc, t| t.apply(acc)),
            Transform::Inverse(inner) => inner.inverse_apply(p),
        }
    }

    /// Map a target-frame point back into the local frame.
    ///
    /// Returns [`Point2::unmapped`] when no preimage can be found.
    pub fn inverse_apply(&self, p: Point2) -> Point2 {
        match self {
            Transform::Identity => p,
            Transform::Translation { dx, dy } => Point2::new(p.x - dx, p.y - dy),
            Transform::Rigid {
                angle,
                center,
                translation,
            } => {
                let (sin, cos) = angle.sin_cos();
                let x = p.x - center.x - translation.x;
                let y = p.y - center.y - translation.y;
                Point2::new(cos * x + sin * y + center.x, -sin * x + cos * y + center.y)
            }
            Transform::Affine(m) => match m.inverse() {
                Ok(inv) => inv.apply(p),
                Err(_) => Point2::unmapped(),
            },
            Transform::Polynomial(warp) => warp.inverse_apply(p),
            Transform::Cascade(items) => items.iter().rev().fold(p, |acc, t| {
                if acc.is_finite() {
                    t.inverse_apply(acc)
                } else {
                    acc
                }
            }),
            Transform::Inverse(inner) => inner.apply(p),
        }
    }

    /// The inverse transform, closed-form where one exists.
    pub fn inverted(&self) -> Transform {
        match self {
            Transform::Identity => Transform::Identity,
            Transform::Translation { dx, dy } => Transform::translation(-dx, -dy),
            Transform::Rigid {
                angle,
                center,
                translation,
            } => Transform::rigid(
                -angle,
                Point2::new(center.x + translation.x, center.y + translation.y),
                Point2::new(-translation.x, -translation.y),
            ),
            Transform::Affine(m) => match m.inverse() {
                Ok(inv) => Transform::Affine(inv),
                Err(_) => Transform::Inverse(Box::new(self.clone())),
            },
            Transform::Polynomial(_) => Transform::Inverse(Box::new(self.clone())),
            Transform::Cascade(items) => {
                Transform::Cascade(items.iter().rev().map(Transform::inverted).collect())
            }
            Transform::Inverse(inner) => (**inner).clone(),
        }
    }

    /// Bounding box of the local rectangle `extent` after mapping into the
    /// target frame.
    ///
    /// Linear transforms are bounded by their four corners; non-linear ones
    /// additionally sample every edge.
    pub fn map_bounds(&self, extent: &BoundingBox) -> BoundingBox {
        let mut bounds = BoundingBox::EMPTY;
        let corners = [
            extent.min,
            Point2::new(extent.max.x, extent.min.y),
            extent.max,
            Point2::new(extent.min.x, extent.max.y),
        ];
        for corner in corners {
            bounds.include(self.apply(corner));
        }

        if !self.is_linear() {
            for i in 1..EDGE_SAMPLES {
                let t = i as f64 / EDGE_SAMPLES as f64;
                let x = extent.min.x + t * (extent.max.x - extent.min.x);
                let y = extent.min.y + t * (extent.max.y - extent.min.y);
                bounds.include(self.apply(Point2::new(x, extent.min.y)));
                bounds.include(self.apply(Point2::new(x, extent.max.y)));
                bounds.include(self.apply(Point2::new(extent.min.x, y)));
                bounds.include(self.apply(Point2::new(extent.max.x, y)));
            }
        }
        bounds
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::Identity
    }
}

// =============================================================================
// Tests
// =============================================================================
