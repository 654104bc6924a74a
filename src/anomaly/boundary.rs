//! One-class boundary around the reference population
//!
//! A ν one-class SVM with an RBF kernel, trained with SMO. The dual is
//!
//! ```text
//! min ½ αᵀ K α   s.t.  0 ≤ αᵢ ≤ 1,  Σ αᵢ = ν·n
//! ```
//!
//! and the decision value `f(x) = Σ αᵢ K(xᵢ, x) − ρ` is positive inside the
//! learned region.

use super::{LatentScorer, ScoringMethod};
use crate::error::{Result, ScoringError};
use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Maximum number of reference samples for the eager kernel matrix.
/// Beyond this, fitting returns an error to prevent OOM.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Smallest curvature allowed in the SMO pair update
const TAU: f64 = 1e-12;

/// Coefficients this close to 0 or 1 count as sitting at the bound
const BOUND_EPS: f64 = 1e-12;

/// Coefficients below this are not kept as support vectors
const SUPPORT_THRESHOLD: f64 = 1e-8;

/// How raw decision values are mapped into [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryNormalization {
    /// Min-max over the decision values of the batch being scored.
    ///
    /// Confidences are only comparable within one scoring call: the same
    /// sample can map to different values when scored alongside different
    /// companions. A batch with zero spread maps each sample to 1.0 when it
    /// lies inside the boundary and 0.0 otherwise.
    #[default]
    Batch,
    /// Min-max over the decision values of the reference batch, recorded at
    /// fit time, clamped to [0, 1]. Comparable across calls.
    Reference,
}

/// Fitted one-class boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryModel {
    support_vectors: Array2<f64>,
    dual_coef: Array1<f64>,
    rho: f64,
    gamma: f64,
    nu: f64,
    normalization: BoundaryNormalization,
    /// Smallest and largest decision value over the reference batch
    reference_bounds: (f64, f64),
    converged: bool,
    n_iter: usize,
}

impl BoundaryModel {
    pub fn n_support_vectors(&self) -> usize {
        self.support_vectors.nrows()
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn nu(&self) -> f64 {
        self.nu
    }

    pub fn normalization(&self) -> BoundaryNormalization {
        self.normalization
    }

    pub fn reference_bounds(&self) -> (f64, f64) {
        self.reference_bounds
    }

    /// Whether SMO met its tolerance before the iteration budget ran out
    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Same boundary with a different normalization mode
    pub fn with_normalization(mut self, normalization: BoundaryNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// Signed distance to the boundary for every query row (positive = inside)
    pub fn decision_function(&self, query: &Array2<f64>) -> Result<Array1<f64>> {
        super::check_batch(query, Some(self.support_vectors.ncols()), "boundary query")?;

        let values: Vec<f64> = (0..query.nrows())
            .into_par_iter()
            .map(|i| {
                let sample = query.row(i);
                let mut sum = -self.rho;
                for (j, sv) in self.support_vectors.rows().into_iter().enumerate() {
                    sum += self.dual_coef[j] * rbf(sample, sv, self.gamma);
                }
                sum
            })
            .collect();

        Ok(Array1::from_vec(values))
    }

    /// Map decision values into [0, 1] according to the normalization mode
    pub fn normalize(&self, decision: &Array1<f64>) -> Array1<f64> {
        let (lo, hi) = match self.normalization {
            BoundaryNormalization::Batch => {
                let lo = decision.iter().copied().fold(f64::INFINITY, f64::min);
                let hi = decision.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                (lo, hi)
            }
            BoundaryNormalization::Reference => self.reference_bounds,
        };

        let range = hi - lo;
        if !(range > 0.0) || !range.is_finite() {
            return decision.mapv(|v| if v >= 0.0 { 1.0 } else { 0.0 });
        }
        decision.mapv(|v| ((v - lo) / range).clamp(0.0, 1.0))
    }
}

impl LatentScorer for BoundaryModel {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Boundary
    }

    fn n_features(&self) -> usize {
        self.support_vectors.ncols()
    }

    fn score(&self, query: &Array2<f64>) -> Result<Array1<f64>> {
        let decision = self.decision_function(query)?;
        Ok(self.normalize(&decision))
    }
}

/// ν one-class SVM estimator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneClassSvm {
    /// Fraction of reference samples allowed outside the boundary
    pub nu: f64,
    /// RBF width; `None` uses `1 / (n_features * Var(X))`
    pub gamma: Option<f64>,
    /// Tolerance on the maximal KKT violation
    pub tol: f64,
    /// Maximum SMO pair updates
    pub max_iter: usize,
    pub normalization: BoundaryNormalization,
}

impl Default for OneClassSvm {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl OneClassSvm {
    pub fn new(nu: f64) -> Self {
        Self {
            nu,
            gamma: None,
            tol: 1e-3,
            max_iter: 10_000,
            normalization: BoundaryNormalization::Batch,
        }
    }

    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = Some(gamma);
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_normalization(mut self, normalization: BoundaryNormalization) -> Self {
        self.normalization = normalization;
        self
    }

    /// `1 / (n_features * Var(X))` over all entries, or 1 for constant data
    fn scale_gamma(x: &Array2<f64>) -> f64 {
        let n = x.len() as f64;
        let mean = x.sum() / n;
        let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        if var > 0.0 {
            1.0 / (x.ncols() as f64 * var)
        } else {
            1.0
        }
    }

    /// Fit the boundary on reference latents
    pub fn fit(&self, reference: &Array2<f64>) -> Result<BoundaryModel> {
        if !(self.nu > 0.0 && self.nu < 1.0) {
            return Err(ScoringError::invalid_parameter(
                "outlier_fraction",
                self.nu,
                "must lie in (0, 1)",
            ));
        }
        let n = reference.nrows();
        if n < 1 {
            return Err(ScoringError::insufficient("one-class boundary", 1, n));
        }
        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(ScoringError::InvalidInput(format!(
                "Reference has {} samples, exceeding the maximum {} for the boundary kernel matrix. \
                 Consider subsampling.",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }
        super::check_batch(reference, None, "reference latents")?;

        let gamma = match self.gamma {
            Some(g) if g > 0.0 && g.is_finite() => g,
            Some(g) => {
                return Err(ScoringError::invalid_parameter(
                    "boundary_gamma",
                    g,
                    "must be positive and finite",
                ))
            }
            None => Self::scale_gamma(reference),
        };

        let kernel = compute_kernel_matrix(reference, gamma);

        // Feasible start: the first ⌊ν·n⌋ coefficients at the upper bound
        let total = self.nu * n as f64;
        let mut alphas = Array1::<f64>::zeros(n);
        let n_full = (total.floor() as usize).min(n);
        for i in 0..n_full {
            alphas[i] = 1.0;
        }
        if n_full < n {
            alphas[n_full] = total - n_full as f64;
        }

        // Gradient of ½ αᵀKα
        let mut grad = kernel.dot(&alphas);

        let mut converged = false;
        let mut n_iter = 0;
        while n_iter < self.max_iter {
            // Maximal violating pair: i can grow, j can shrink
            let mut i_sel = None;
            let mut g_max = f64::NEG_INFINITY;
            let mut j_sel = None;
            let mut g_min = f64::INFINITY;
            for t in 0..n {
                if alphas[t] < 1.0 && -grad[t] > g_max {
                    g_max = -grad[t];
                    i_sel = Some(t);
                }
                if alphas[t] > 0.0 && -grad[t] < g_min {
                    g_min = -grad[t];
                    j_sel = Some(t);
                }
            }

            let (i, j) = match (i_sel, j_sel) {
                (Some(i), Some(j)) if g_max - g_min >= self.tol && i != j => (i, j),
                _ => {
                    converged = true;
                    break;
                }
            };

            let quad = (kernel[[i, i]] + kernel[[j, j]] - 2.0 * kernel[[i, j]]).max(TAU);
            let delta = ((grad[j] - grad[i]) / quad).min(1.0 - alphas[i]).min(alphas[j]);

            alphas[i] += delta;
            alphas[j] -= delta;
            for t in 0..n {
                grad[t] += delta * (kernel[[t, i]] - kernel[[t, j]]);
            }
            n_iter += 1;
        }

        if !converged {
            warn!(
                iterations = n_iter,
                "One-class boundary did not reach tolerance, keeping current solution"
            );
        }

        let rho = compute_rho(&alphas, &grad);

        let support_indices: Vec<usize> = alphas
            .iter()
            .enumerate()
            .filter(|(_, &a)| a > SUPPORT_THRESHOLD)
            .map(|(i, _)| i)
            .collect();

        let n_features = reference.ncols();
        let mut support_vectors = Array2::zeros((support_indices.len(), n_features));
        let mut dual_coef = Array1::zeros(support_indices.len());
        for (k, &idx) in support_indices.iter().enumerate() {
            support_vectors.row_mut(k).assign(&reference.row(idx));
            dual_coef[k] = alphas[idx];
        }

        // Reference decision values are the gradient shifted by ρ
        let lo = grad.iter().copied().fold(f64::INFINITY, f64::min) - rho;
        let hi = grad.iter().copied().fold(f64::NEG_INFINITY, f64::max) - rho;

        debug!(
            n_samples = n,
            n_support = support_indices.len(),
            gamma,
            rho,
            n_iter,
            "Fitted one-class boundary"
        );

        Ok(BoundaryModel {
            support_vectors,
            dual_coef,
            rho,
            gamma,
            nu: self.nu,
            normalization: self.normalization,
            reference_bounds: (lo, hi),
            converged,
            n_iter,
        })
    }
}

/// Offset ρ: average gradient over free coefficients, or the midpoint of the
/// feasible interval when every coefficient sits at a bound
fn compute_rho(alphas: &Array1<f64>, grad: &Array1<f64>) -> f64 {
    let mut upper = f64::INFINITY;
    let mut lower = f64::NEG_INFINITY;
    let mut free_sum = 0.0;
    let mut n_free = 0usize;

    for (&a, &g) in alphas.iter().zip(grad.iter()) {
        if a >= 1.0 - BOUND_EPS {
            lower = lower.max(g);
        } else if a <= BOUND_EPS {
            upper = upper.min(g);
        } else {
            free_sum += g;
            n_free += 1;
        }
    }

    if n_free > 0 {
        free_sum / n_free as f64
    } else if upper.is_finite() && lower.is_finite() {
        0.5 * (upper + lower)
    } else if upper.is_finite() {
        upper
    } else {
        lower
    }
}

fn rbf(a: ArrayView1<f64>, b: ArrayView1<f64>, gamma: f64) -> f64 {
    let dist_sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum();
    (-gamma * dist_sq).exp()
}

/// Compute the RBF kernel matrix (parallelized for large batches)
fn compute_kernel_matrix(x: &Array2<f64>, gamma: f64) -> Array2<f64> {
    let n = x.nrows();

    // For small matrices, sequential is faster due to overhead
    if n < 100 {
        let mut k = Array2::zeros((n, n));
        for i in 0..n {
            for j in i..n {
                let val = rbf(x.row(i), x.row(j), gamma);
                k[[i, j]] = val;
                k[[j, i]] = val;
            }
        }
        return k;
    }

    // Parallel: compute upper triangle rows in parallel
    let rows: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| (i..n).map(|j| (j, rbf(x.row(i), x.row(j), gamma))).collect())
        .collect();

    let mut k = Array2::zeros((n, n));
    for (i, row_vals) in rows.into_iter().enumerate() {
        for (j, val) in row_vals {
            k[[i, j]] = val;
            k[[j, i]] = val;
        }
    }
    k
}
