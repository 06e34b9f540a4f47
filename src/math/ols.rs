//! Least-squares solver.
//!
//! Three places in the engine reduce to small dense least-squares problems:
//!
//! - the damped normal equations of each Levenberg-Marquardt step
//! - the per-line Vandermonde regression of the correction curves
//! - the covariance pseudo-inverse at the fitted solution
//!
//! Implementation choices:
//! - SVD solve, so tall (more rows than columns) systems work and
//!   near-singular systems are rejected instead of exploding.
//! - Parameter dimensions are tiny (a handful of polynomial coefficients),
//!   so SVD cost is irrelevant next to the spectral integration.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if the strict solve fails. The
    // Vandermonde matrices of high sweep resolution over a narrow
    // attenuation range can be nearly rank-deficient.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Pseudo-inverse of a square symmetric matrix (used for the parameter
/// covariance at the solution). Returns `None` when the SVD pseudo-inverse
/// is not finite.
pub fn pseudo_inverse(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let inv = a.clone().svd(true, true).pseudo_inverse(1e-12).ok()?;
    if inv.iter().all(|v| v.is_finite()) {
        Some(inv)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn pseudo_inverse_recovers_identity() {
        let a = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 2.0]);
        let inv = pseudo_inverse(&a).unwrap();
        let prod = &a * inv;
        assert!((prod[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((prod[(1, 1)] - 1.0).abs() < 1e-12);
        assert!(prod[(0, 1)].abs() < 1e-12);
    }
}
