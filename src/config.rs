//! Engine configuration

use crate::anomaly::BoundaryNormalization;
use crate::error::{Result, ScoringError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for fitting and scoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of Gaussian mixture components
    pub n_mixture_components: usize,

    /// Expected fraction of reference samples outside the one-class boundary (ν)
    pub outlier_fraction: f64,

    /// Initial ridge added to a singular or ill-conditioned covariance
    pub covariance_regularization_epsilon: f64,

    /// Covariance matrices above this condition number are regularized
    pub max_condition_number: f64,

    /// Ridge additions (each ×10 larger) before giving up on a covariance
    pub max_regularization_attempts: usize,

    /// EM iteration budget for the mixture model
    pub mixture_max_iterations: usize,

    /// EM stops when the mean log-likelihood changes by less than this
    pub mixture_tolerance: f64,

    /// Ridge added to every mixture component covariance
    pub mixture_reg_covar: f64,

    /// RBF kernel width; `None` uses `1 / (n_features * Var(X))`
    pub boundary_gamma: Option<f64>,

    /// SMO iteration budget for the one-class boundary
    pub boundary_max_iterations: usize,

    /// How raw boundary decision values are mapped into [0, 1]
    pub boundary_normalization: BoundaryNormalization,

    /// Random seed for mixture initialization
    pub random_state: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            n_mixture_components: 3,
            outlier_fraction: 0.05,
            covariance_regularization_epsilon: 1e-6,
            max_condition_number: 1e10,
            max_regularization_attempts: 6,
            mixture_max_iterations: 100,
            mixture_tolerance: 1e-3,
            mixture_reg_covar: 1e-6,
            boundary_gamma: None,
            boundary_max_iterations: 10_000,
            boundary_normalization: BoundaryNormalization::Batch,
            random_state: Some(42),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            ScoringError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_mixture_components(mut self, n: usize) -> Self {
        self.n_mixture_components = n;
        self
    }

    pub fn with_outlier_fraction(mut self, fraction: f64) -> Self {
        self.outlier_fraction = fraction;
        self
    }

    pub fn with_regularization_epsilon(mut self, epsilon: f64) -> Self {
        self.covariance_regularization_epsilon = epsilon;
        self
    }

    pub fn with_mixture_max_iterations(mut self, n: usize) -> Self {
        self.mixture_max_iterations = n;
        self
    }

    pub fn with_mixture_tolerance(mut self, tol: f64) -> Self {
        self.mixture_tolerance = tol;
        self
    }

    pub fn with_boundary_gamma(mut self, gamma: f64) -> Self {
        self.boundary_gamma = Some(gamma);
        self
    }

    pub fn with_boundary_normalization(mut self, normalization: BoundaryNormalization) -> Self {
        self.boundary_normalization = normalization;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Check every option against its valid range
    pub fn validate(&self) -> Result<()> {
        if self.n_mixture_components == 0 {
            return Err(ScoringError::invalid_parameter(
                "n_mixture_components",
                self.n_mixture_components,
                "must be positive",
            ));
        }
        if !(self.outlier_fraction > 0.0 && self.outlier_fraction < 1.0) {
            return Err(ScoringError::invalid_parameter(
                "outlier_fraction",
                self.outlier_fraction,
                "must lie in (0, 1)",
            ));
        }
        if !(self.covariance_regularization_epsilon > 0.0) {
            return Err(ScoringError::invalid_parameter(
                "covariance_regularization_epsilon",
                self.covariance_regularization_epsilon,
                "must be positive",
            ));
        }
        if !(self.max_condition_number > 1.0) {
            return Err(ScoringError::invalid_parameter(
                "max_condition_number",
                self.max_condition_number,
                "must be greater than 1",
            ));
        }
        if self.mixture_max_iterations == 0 {
            return Err(ScoringError::invalid_parameter(
                "mixture_max_iterations",
                self.mixture_max_iterations,
                "must be positive",
            ));
        }
        if !(self.mixture_tolerance >= 0.0) {
            return Err(ScoringError::invalid_parameter(
                "mixture_tolerance",
                self.mixture_tolerance,
                "must be non-negative",
            ));
        }
        if !(self.mixture_reg_covar >= 0.0) {
            return Err(ScoringError::invalid_parameter(
                "mixture_reg_covar",
                self.mixture_reg_covar,
                "must be non-negative",
            ));
        }
        if let Some(gamma) = self.boundary_gamma {
            if !(gamma > 0.0) || !gamma.is_finite() {
                return Err(ScoringError::invalid_parameter(
                    "boundary_gamma",
                    gamma,
                    "must be positive and finite",
                ));
            }
        }
        if self.boundary_max_iterations == 0 {
            return Err(ScoringError::invalid_parameter(
                "boundary_max_iterations",
                self.boundary_max_iterations,
                "must be positive",
            ));
        }
        Ok(())
    }
}
