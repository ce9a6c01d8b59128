//! Least squares solver for small linear subproblems.
//!
//! Several places in this crate repeatedly solve tiny linear regression
//! problems:
//!
//! - the piecewise contact-point estimators solve a 2-column system per
//!   candidate split index
//! - the baseline-slope rating feature fits a line to the baseline residuals
//!
//! Implementation choices:
//! - We use SVD so the solve stays robust for tall matrices (many samples,
//!   2-3 columns) and for nearly collinear columns, which occur when the
//!   candidate split leaves almost no points on one side.
//! - The parameter dimension is tiny, so SVD performance is a non-issue.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if the strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
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
    fn least_squares_tall_system() {
        // Overdetermined but consistent: y = 1 + 2x on five points.
        let xs = [0.0, 0.5, 1.0, 1.5, 2.0];
        let mut m = DMatrix::<f64>::zeros(5, 2);
        let mut y = DVector::<f64>::zeros(5);
        for (i, &xi) in xs.iter().enumerate() {
            m[(i, 0)] = 1.0;
            m[(i, 1)] = xi;
            y[i] = 1.0 + 2.0 * xi;
        }
        let beta = solve_least_squares(&m, &y).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-9);
        assert!((beta[1] - 2.0).abs() < 1e-9);
    }
}
