//! Dense linear algebra for small symmetric positive-definite matrices
//!
//! Latent spaces are low dimensional (tens of dimensions), so everything here
//! works directly on `Array2<f64>` without an external LAPACK.

use crate::error::{Result, ScoringError};
use ndarray::{Array1, Array2};

/// Cholesky decomposition `A = L * L^T`.
///
/// Returns `None` when `a` is not positive definite.
pub fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }

            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    Some(l)
}

/// Invert a lower triangular matrix by forward substitution
pub fn invert_lower_triangular(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut l_inv = Array2::zeros((n, n));

    for i in 0..n {
        l_inv[[i, i]] = 1.0 / l[[i, i]];
        for j in 0..i {
            let mut sum = 0.0;
            for k in j..i {
                sum -= l[[i, k]] * l_inv[[k, j]];
            }
            l_inv[[i, j]] = sum / l[[i, i]];
        }
    }

    l_inv
}

/// Inverse of `L * L^T` given its Cholesky factor, symmetrized
pub fn cholesky_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let l_inv = invert_lower_triangular(l);

    // A^-1 = L^-T * L^-1
    let mut inverse = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in i..n {
                sum += l_inv[[k, i]] * l_inv[[k, j]];
            }
            inverse[[i, j]] = sum;
            inverse[[j, i]] = sum;
        }
    }

    inverse
}

/// `log det(A)` from the Cholesky factor of `A`
pub fn log_det_from_cholesky(l: &Array2<f64>) -> f64 {
    2.0 * l.diag().iter().map(|d| d.ln()).sum::<f64>()
}

/// Eigenvalues of a symmetric matrix via cyclic Jacobi rotations, ascending
pub fn symmetric_eigenvalues(a: &Array2<f64>) -> Array1<f64> {
    const MAX_SWEEPS: usize = 100;

    let n = a.nrows();
    let mut m = a.clone();
    let scale: f64 = a.iter().map(|v| v * v).sum::<f64>().max(f64::MIN_POSITIVE);

    for _sweep in 0..MAX_SWEEPS {
        let mut off_diag = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off_diag += m[[p, q]] * m[[p, q]];
            }
        }
        if off_diag <= 1e-30 * scale {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }

                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
            }
        }
    }

    let mut eigenvalues: Vec<f64> = m.diag().to_vec();
    eigenvalues.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Array1::from_vec(eigenvalues)
}

/// 2-norm condition number of a symmetric matrix.
///
/// Infinite when the smallest eigenvalue is not positive.
pub fn condition_number(a: &Array2<f64>) -> f64 {
    let eigenvalues = symmetric_eigenvalues(a);
    let n = eigenvalues.len();
    if n == 0 {
        return 1.0;
    }

    let min = eigenvalues[0];
    let max = eigenvalues[n - 1];
    if min <= 0.0 {
        f64::INFINITY
    } else {
        max / min
    }
}

/// How to regularize a covariance matrix that cannot be factored cleanly
#[derive(Debug, Clone, Copy)]
pub struct RegularizationPolicy {
    /// Initial ridge added to the diagonal
    pub epsilon: f64,
    /// Largest acceptable condition number (`INFINITY` disables the check)
    pub max_condition_number: f64,
    /// Number of ridge additions before giving up; the ridge grows ×10 each time
    pub max_attempts: usize,
    /// Regularize even if the raw matrix factors (rank-deficient sample)
    pub force: bool,
}

impl Default for RegularizationPolicy {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_condition_number: 1e10,
            max_attempts: 6,
            force: false,
        }
    }
}

/// A covariance matrix that has been made positive definite
#[derive(Debug, Clone)]
pub struct Regularized {
    /// The (possibly ridged) matrix
    pub matrix: Array2<f64>,
    /// Its Cholesky factor
    pub cholesky: Array2<f64>,
    /// Total ridge added to the diagonal
    pub ridge: f64,
    /// Condition number (`NAN` when not computed)
    pub condition_number: f64,
}

/// Factor `matrix`, adding a ridge and retrying while it is singular or
/// ill-conditioned. The ridge starts at `epsilon` times the mean diagonal
/// entry, so it scales with the matrix.
///
/// If every attempt factors but none meets the condition limit, the last
/// factorization is returned with a warning. Only a matrix that never factors
/// is an error.
pub fn regularized_cholesky(matrix: &Array2<f64>, policy: RegularizationPolicy) -> Result<Regularized> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(ScoringError::dimension("covariance matrix", n, matrix.ncols()));
    }

    let check_condition = policy.max_condition_number.is_finite();
    let scale = ridge_scale(matrix);
    let mut current = matrix.clone();
    let mut ridge = 0.0;
    let mut step = (policy.epsilon * scale).max(f64::MIN_POSITIVE);
    let mut last_factored: Option<Regularized> = None;

    for attempt in 0..=policy.max_attempts {
        let skip = attempt == 0 && policy.force;
        if !skip {
            if let Some(l) = cholesky(&current) {
                let cond = if check_condition {
                    condition_number(&current)
                } else {
                    f64::NAN
                };
                let factored = Regularized {
                    matrix: current.clone(),
                    cholesky: l,
                    ridge,
                    condition_number: cond,
                };
                if !check_condition || cond <= policy.max_condition_number {
                    if ridge > 0.0 {
                        tracing::debug!(ridge, attempts = attempt, "Regularized covariance matrix");
                    }
                    return Ok(factored);
                }
                last_factored = Some(factored);
            }
        }

        if attempt == policy.max_attempts {
            break;
        }

        for i in 0..n {
            current[[i, i]] += step;
        }
        ridge += step;
        step *= 10.0;
    }

    if let Some(factored) = last_factored {
        tracing::warn!(
            ridge = factored.ridge,
            condition_number = factored.condition_number,
            max_condition_number = policy.max_condition_number,
            "Covariance matrix stays ill-conditioned after regularization, using last factorization"
        );
        return Ok(factored);
    }

    Err(ScoringError::NumericalInstability(format!(
        "covariance matrix ({}x{}) not invertible after adding a ridge of {:.3e}",
        n, n, ridge
    )))
}

/// Mean absolute diagonal entry, or 1 when that is zero or not finite
fn ridge_scale(matrix: &Array2<f64>) -> f64 {
    let n = matrix.nrows();
    if n == 0 {
        return 1.0;
    }
    let mean = matrix.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
    if mean > 0.0 && mean.is_finite() {
        mean
    } else {
        1.0
    }
}
