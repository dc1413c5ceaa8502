//! Transition-matrix utilities
//!
//! Annual rating-transition matrices periodize to shorter steps through an
//! iterated principal square root. The root of a stochastic matrix can
//! carry small negative entries, so each root passes through a
//! regularization that zeroes negative mass and renormalizes rows.

use nalgebra::DMatrix;

use crate::error::{EngineError, EngineResult};

const SQRT_MAX_ITERATIONS: usize = 500;
const SQRT_TOLERANCE: f64 = 1e-12;

/// Principal square root by Newton iteration:
/// `X_{k+1} = (X_k + A X_k^{-1}) / 2`.
pub fn matrix_sqrt(matrix: &DMatrix<f64>) -> EngineResult<DMatrix<f64>> {
    if !matrix.is_square() {
        return Err(EngineError::numerical("matrix square root needs a square matrix"));
    }
    let n = matrix.nrows();
    let mut x = matrix.clone();

    for _ in 0..SQRT_MAX_ITERATIONS {
        let inverse = x
            .clone()
            .try_inverse()
            .ok_or_else(|| EngineError::numerical("singular iterate in matrix square root"))?;
        let next = (&x + matrix * inverse) * 0.5;
        let delta = (&next - &x).abs().max();
        x = next;
        if delta < SQRT_TOLERANCE {
            break;
        }
    }

    let residual = (&x * &x - matrix).abs().max();
    if residual > 1e-6 {
        return Err(EngineError::numerical(format!(
            "matrix square root did not converge (residual {residual:.3e}, order {n})"
        )));
    }
    Ok(x)
}

/// Regularize a near-stochastic matrix: clip negative entries to zero and
/// renormalize each row to sum to one.
pub fn regularize_rows(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = matrix.clone();
    for mut row in out.row_iter_mut() {
        for value in row.iter_mut() {
            if *value < 0.0 {
                *value = 0.0;
            }
        }
        let sum: f64 = row.iter().sum();
        if sum > 0.0 {
            for value in row.iter_mut() {
                *value /= sum;
            }
        }
    }
    out
}

/// Row-wise cumulative probabilities, used as migration thresholds.
pub fn cumulative_rows(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = matrix.clone();
    for mut row in out.row_iter_mut() {
        let mut running = 0.0;
        for value in row.iter_mut() {
            running += *value;
            *value = running;
        }
    }
    out
}

/// Lower-triangular Cholesky factor; fails on non-positive-definite
/// input.
pub fn cholesky_factor(matrix: &DMatrix<f64>) -> EngineResult<DMatrix<f64>> {
    nalgebra::Cholesky::new(matrix.clone())
        .map(|c| c.l())
        .ok_or_else(|| {
            EngineError::numerical("correlation matrix is not positive definite")
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn simple_stochastic() -> DMatrix<f64> {
        DMatrix::from_row_slice(3, 3, &[
            0.90, 0.08, 0.02,
            0.05, 0.90, 0.05,
            0.00, 0.00, 1.00,
        ])
    }

    #[test]
    fn test_sqrt_squares_back() {
        let matrix = simple_stochastic();
        let root = matrix_sqrt(&matrix).unwrap();
        let squared = &root * &root;
        for (a, b) in squared.iter().zip(matrix.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_regularized_rows_sum_to_one() {
        let matrix = DMatrix::from_row_slice(2, 2, &[1.05, -0.05, 0.3, 0.7]);
        let fixed = regularize_rows(&matrix);
        for row in fixed.row_iter() {
            let sum: f64 = row.iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
            assert!(row.iter().all(|&v| v >= 0.0));
        }
    }

    #[test]
    fn test_cumulative_rows_end_at_one() {
        let matrix = simple_stochastic();
        let cumulative = cumulative_rows(&matrix);
        for row in cumulative.row_iter() {
            assert_relative_eq!(row[row.len() - 1], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cholesky_of_identity() {
        let identity = DMatrix::identity(4, 4);
        let factor = cholesky_factor(&identity).unwrap();
        assert_relative_eq!((&factor * factor.transpose() - identity).abs().max(), 0.0);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let bad = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        assert!(matches!(
            cholesky_factor(&bad),
            Err(EngineError::Numerical(_))
        ));
    }
}
