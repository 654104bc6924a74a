//! Mean and regularized covariance of reference latents

use crate::error::{Result, ScoringError};
use crate::linalg::{self, RegularizationPolicy};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Fitted mean and covariance of a reference population
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovarianceModel {
    /// Sample mean (length L)
    pub mean: Array1<f64>,
    /// Sample covariance with `N - 1` denominator, plus any ridge (L x L)
    pub covariance: Array2<f64>,
    /// Inverse of `covariance` (precision matrix)
    pub inverse_covariance: Array2<f64>,
    /// Total ridge added to the diagonal before inversion
    pub regularization: f64,
    /// Condition number of `covariance`
    pub condition_number: f64,
    /// Number of reference samples the model was fitted on
    pub n_samples: usize,
}

impl CovarianceModel {
    /// Latent dimensionality
    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Whether the raw sample covariance had to be ridged
    pub fn is_regularized(&self) -> bool {
        self.regularization > 0.0
    }
}

/// Estimates a [`CovarianceModel`] from reference latents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CovarianceEstimator {
    /// Initial ridge as a fraction of the mean variance
    epsilon: f64,
    /// Largest acceptable condition number before ridging
    max_condition_number: f64,
    /// Ridge additions before settling for the last factorization
    max_attempts: usize,
}

impl Default for CovarianceEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl CovarianceEstimator {
    /// Estimator with `ε = 1e-6` and a condition limit of `1e10`
    pub fn new() -> Self {
        Self {
            epsilon: 1e-6,
            max_condition_number: 1e10,
            max_attempts: 6,
        }
    }

    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_max_condition_number(mut self, limit: f64) -> Self {
        self.max_condition_number = limit;
        self
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Fit mean, covariance and its inverse.
    ///
    /// A rank-deficient sample (`L >= N`) is always ridged; otherwise the ridge
    /// is only added when the factorization fails or the matrix is
    /// ill-conditioned.
    pub fn fit(&self, reference: &Array2<f64>) -> Result<CovarianceModel> {
        let n_samples = reference.nrows();
        if n_samples < 2 {
            return Err(ScoringError::insufficient("covariance estimator", 2, n_samples));
        }
        super::check_batch(reference, None, "reference latents")?;

        let n_features = reference.ncols();
        let mean = reference.mean_axis(Axis(0)).ok_or_else(|| {
            ScoringError::InvalidInput("Failed to compute mean of reference latents".to_string())
        })?;

        let centered = reference - &mean;
        let mut covariance = centered.t().dot(&centered) / (n_samples - 1) as f64;

        // Exact symmetry regardless of summation order
        for i in 0..n_features {
            for j in 0..i {
                let avg = 0.5 * (covariance[[i, j]] + covariance[[j, i]]);
                covariance[[i, j]] = avg;
                covariance[[j, i]] = avg;
            }
        }

        let rank_deficient = n_features >= n_samples;
        let policy = RegularizationPolicy {
            epsilon: self.epsilon,
            max_condition_number: self.max_condition_number,
            max_attempts: self.max_attempts,
            force: rank_deficient,
        };
        let regularized = linalg::regularized_cholesky(&covariance, policy)?;
        let inverse_covariance = linalg::cholesky_inverse(&regularized.cholesky);

        debug!(
            n_samples,
            n_features,
            ridge = regularized.ridge,
            condition_number = regularized.condition_number,
            "Fitted covariance model"
        );

        Ok(CovarianceModel {
            mean,
            covariance: regularized.matrix,
            inverse_covariance,
            regularization: regularized.ridge,
            condition_number: regularized.condition_number,
            n_samples,
        })
    }
}
