//! # Polynomial fitting
//!
//! Least squares fitting of the reference curve through the body frame waypoints.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use nalgebra::{DMatrix, DVector};

// Internal
use util::maths::poly_val;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Relative size of a diagonal element of R, compared to the largest, below which the fit is
/// considered rank deficient.
const RANK_TOLERANCE: f64 = 1e-12;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while fitting a polynomial.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PolyFitError {
    #[error("Polynomial order must be at least 1")]
    InvalidOrder,

    #[error("Expected the same number of x and y values, found {0} x and {1} y")]
    LengthMismatch(usize, usize),

    #[error("A polynomial of order {order} needs at least {required} points, found {found}")]
    InsufficientPoints {
        order: usize,
        required: usize,
        found: usize
    },

    #[error("The points do not determine a unique polynomial (are there repeated x values?)")]
    RankDeficient,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Fit a polynomial of the given order through the points.
///
/// The returned coefficients are in ascending order of power, `coeffs[i]` multiplies `x^i`, and
/// there are always `order + 1` of them.
///
/// The least squares problem is solved using a Householder QR factorisation of the Vandermonde
/// matrix rather than the normal equations, which square the already poor conditioning of the
/// Vandermonde matrix.
pub fn poly_fit(xs: &[f64], ys: &[f64], order: usize) -> Result<Vec<f64>, PolyFitError> {
    if order < 1 {
        return Err(PolyFitError::InvalidOrder)
    }
    if xs.len() != ys.len() {
        return Err(PolyFitError::LengthMismatch(xs.len(), ys.len()))
    }
    if xs.len() < order + 1 {
        return Err(PolyFitError::InsufficientPoints {
            order,
            required: order + 1,
            found: xs.len()
        })
    }

    // Vandermonde matrix, column j holds x^j
    let a = DMatrix::from_fn(xs.len(), order + 1, |i, j| xs[i].powi(j as i32));
    let b = DVector::from_column_slice(ys);

    // A = QR, so the least squares solution satisfies R c = Q^T b
    let qr = a.qr();
    let q = qr.q();
    let r = qr.r();

    let max_diag = r.diagonal().iter().fold(0f64, |m, d| m.max(d.abs()));
    if !(max_diag > 0.0)
        || r.diagonal().iter().any(|d| d.abs() <= RANK_TOLERANCE * max_diag)
    {
        return Err(PolyFitError::RankDeficient)
    }

    let qtb = q.transpose() * b;

    match r.solve_upper_triangular(&qtb) {
        Some(c) => Ok(c.iter().cloned().collect()),
        None => Err(PolyFitError::RankDeficient)
    }
}

/// Evaluate a polynomial with ascending order coefficients.
pub fn poly_eval(coeffs: &[f64], x: f64) -> f64 {
    poly_val(x, coeffs)
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_line_recovered() {
        // y = 2 - 0.5x
        let xs = vec![-4.0, 0.0, 3.0, 7.5, 12.0];
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 - 0.5 * x).collect();

        let coeffs = poly_fit(&xs, &ys, 1).unwrap();

        assert_eq!(coeffs.len(), 2);
        assert_relative_eq!(coeffs[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(coeffs[1], -0.5, epsilon = 1e-10);
    }

    #[test]
    fn test_cubic_recovered() {
        let truth = [0.8, -0.1, 0.02, -0.0004];
        let xs: Vec<f64> = (0..8).map(|i| i as f64 * 10.0).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| poly_eval(&truth, x)).collect();

        let coeffs = poly_fit(&xs, &ys, 3).unwrap();

        for (c, t) in coeffs.iter().zip(truth.iter()) {
            assert_relative_eq!(*c, *t, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_least_squares() {
        // Zig-zag points, the fit is the ordinary least squares line
        let xs = vec![0.0, 1.0, 2.0, 3.0];
        let ys = vec![0.5, 1.5, 0.5, 1.5];

        let coeffs = poly_fit(&xs, &ys, 1).unwrap();

        assert_relative_eq!(coeffs[0], 0.7, epsilon = 1e-10);
        assert_relative_eq!(coeffs[1], 0.2, epsilon = 1e-10);
    }

    #[test]
    fn test_insufficient_points() {
        assert_eq!(
            poly_fit(&[10.0, 20.0, 30.0], &[0.0, 0.0, 0.0], 3),
            Err(PolyFitError::InsufficientPoints { order: 3, required: 4, found: 3 })
        );
        assert_eq!(poly_fit(&[], &[], 1), Err(PolyFitError::InsufficientPoints {
            order: 1, required: 2, found: 0
        }));
    }

    #[test]
    fn test_invalid_inputs() {
        assert_eq!(poly_fit(&[1.0, 2.0], &[1.0, 2.0], 0), Err(PolyFitError::InvalidOrder));
        assert_eq!(
            poly_fit(&[1.0, 2.0, 3.0], &[1.0, 2.0], 1),
            Err(PolyFitError::LengthMismatch(3, 2))
        );
        assert_eq!(
            poly_fit(&[2.0, 2.0, 2.0], &[1.0, 2.0, 3.0], 1),
            Err(PolyFitError::RankDeficient)
        );
    }
}
