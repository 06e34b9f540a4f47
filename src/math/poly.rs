//! Polynomial evaluation and least-squares polynomial regression.
//!
//! Coefficients are stored lowest order first throughout the crate:
//! `polyval(&[c0, c1, c2], x) == c0 + c1*x + c2*x^2`.

use nalgebra::{DMatrix, DVector};

use crate::error::BhcError;
use crate::math::solve_least_squares;

/// Evaluate a polynomial with coefficients in ascending order.
pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    // Horner, highest order first.
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

/// `n` evenly spaced values from `start` to `stop` inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    if n == 1 {
        return vec![start];
    }
    let step = (stop - start) / (n as f64 - 1.0);
    (0..n).map(|i| start + step * i as f64).collect()
}

/// Least-squares fit of a polynomial of the given order mapping `x -> y`.
///
/// Returns the `order + 1` coefficients, ascending. Fails with
/// `NumericInstability` when the Vandermonde system is too ill-conditioned.
pub fn polyfit(x: &[f64], y: &[f64], order: usize) -> Result<Vec<f64>, BhcError> {
    if x.len() != y.len() {
        return Err(BhcError::Configuration(format!(
            "polyfit: x has {} points but y has {}",
            x.len(),
            y.len()
        )));
    }
    let ncoef = order + 1;
    if x.len() < ncoef {
        return Err(BhcError::Configuration(format!(
            "polyfit: {} points cannot determine order {} polynomial",
            x.len(),
            order
        )));
    }

    let mut design = DMatrix::<f64>::zeros(x.len(), ncoef);
    for (i, &xi) in x.iter().enumerate() {
        let mut pow = 1.0;
        for j in 0..ncoef {
            design[(i, j)] = pow;
            pow *= xi;
        }
    }
    let rhs = DVector::from_column_slice(y);

    let beta = solve_least_squares(&design, &rhs).ok_or_else(|| {
        BhcError::NumericInstability("polyfit: singular Vandermonde system".into())
    })?;
    Ok(beta.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polyval_matches_direct_sum() {
        let c = [1.0, -2.0, 0.5];
        let x = 3.0;
        assert!((polyval(&c, x) - (1.0 - 2.0 * 3.0 + 0.5 * 9.0)).abs() < 1e-12);
    }

    #[test]
    fn linspace_endpoints_and_count() {
        let v = linspace(0.0, 12.0, 300);
        assert_eq!(v.len(), 300);
        assert!((v[0]).abs() < 1e-12);
        assert!((v[299] - 12.0).abs() < 1e-12);
    }

    #[test]
    fn polyfit_recovers_exact_polynomial() {
        // Data generated by a polynomial of the fitted order must come back
        // with the exact coefficients (within floating point tolerance).
        let coeffs = [0.25, -1.5, 2.0, 0.125];
        let x: Vec<f64> = linspace(-2.0, 2.0, 41);
        let y: Vec<f64> = x.iter().map(|&xi| polyval(&coeffs, xi)).collect();

        let fit = polyfit(&x, &y, 3).unwrap();
        assert_eq!(fit.len(), 4);
        for (a, b) in fit.iter().zip(coeffs.iter()) {
            assert!((a - b).abs() < 1e-9, "got {a}, want {b}");
        }
    }

    #[test]
    fn polyfit_rejects_underdetermined_input() {
        let x = [0.0, 1.0];
        let y = [0.0, 1.0];
        assert!(polyfit(&x, &y, 3).is_err());
    }
}
