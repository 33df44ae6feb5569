//! Text form of transforms: a type tag followed by whitespace separated
//! parameters.
//!
//! | Tag           | Parameters                                         |
//! |---------------|----------------------------------------------------|
//! | `identity`    | none                                               |
//! | `translation` | `dx dy`                                            |
//! | `rigid`       | `angle cx cy tx ty` (angle in radians)             |
//! | `affine`      | `a b c d tx ty`                                    |
//! | `polynomial`  | `order cx cy scale` then `2 * monomial_count(order)` coefficients, all x first |

use crate::error::TransformError;
use crate::geometry::Point2;

use super::polynomial::{monomial_count, PolynomialWarp};
use super::{AffineMatrix, Transform};

/// Parse a transform from its text form.
///
/// # Example
///
/// ```
/// use mosaic_assembler::transform::{parse_transform, Transform};
///
/// let t = parse_transform("translation 50 0").unwrap();
/// assert_eq!(t, Transform::translation(50.0, 0.0));
/// ```
pub fn parse_transform(text: &str) -> Result<Transform, TransformError> {
    let mut tokens = text.split_whitespace();
    let tag = tokens
        .next()
        .ok_or_else(|| TransformError::UnknownType(String::new()))?
        .to_ascii_lowercase();
    let params = tokens
        .map(|token| {
            token
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| TransformError::InvalidParameter(token.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    match tag.as_str() {
        "identity" => {
            expect_count("identity", &params, 0)?;
            Ok(Transform::Identity)
        }
        "translation" => {
            expect_count("translation", &params, 2)?;
            Ok(Transform::translation(params[0], params[1]))
        }
        "rigid" => {
            expect_count("rigid", &params, 5)?;
            Ok(Transform::rigid(
                params[0],
                Point2::new(params[1], params[2]),
                Point2::new(params[3], params[4]),
            ))
        }
        "affine" => {
            expect_count("affine", &params, 6)?;
            Transform::affine(AffineMatrix {
                a: params[0],
                b: params[1],
                c: params[2],
                d: params[3],
                tx: params[4],
                ty: params[5],
            })
        }
        "polynomial" => parse_polynomial(&params),
        _ => Err(TransformError::UnknownType(tag)),
    }
}

fn parse_polynomial(params: &[f64]) -> Result<Transform, TransformError> {
    if params.len() < 4 {
        return Err(TransformError::ParameterCount {
            tag: "polynomial",
            expected: "at least 4".to_string(),
            actual: params.len(),
        });
    }
    let order = params[0];
    if order.fract() != 0.0 || order < 1.0 {
        return Err(TransformError::InvalidParameter(format!(
            "polynomial order {order}"
        )));
    }
    let order = order as usize;
    let n = monomial_count(order);
    let coefficients = &params[4..];
    if coefficients.len() != 2 * n {
        return Err(TransformError::ParameterCount {
            tag: "polynomial",
            expected: (4 + 2 * n).to_string(),
            actual: params.len(),
        });
    }
    let warp = PolynomialWarp::new(
        order,
        Point2::new(params[1], params[2]),
        params[3],
        coefficients[..n].to_vec(),
        coefficients[n..].to_vec(),
    )?;
    Ok(Transform::Polynomial(warp))
}

fn expect_count(tag: &'static str, params: &[f64], expected: usize) -> Result<(), TransformError> {
    if params.len() != expected {
        return Err(TransformError::ParameterCount {
            tag,
            expected: expected.to_string(),
            actual: params.len(),
        });
    }
    Ok(())
}
