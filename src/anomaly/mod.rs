//! Anomaly scoring in a learned latent space
//!
//! Four independent views of "normal":
//! - [`ReconstructionScorer`] - mean squared reconstruction error (raw magnitude)
//! - [`CovarianceEstimator`] + Mahalanobis distance - confidence in (0, 1]
//! - [`GaussianMixture`] - likelihood-based confidence in (0, 1)
//! - [`OneClassSvm`] - boundary-distance confidence in [0, 1]
//!
//! Statistical models are fitted once from a reference batch, returned as
//! immutable values, and scored through [`LatentScorer`]. The four score
//! vectors are bundled by [`aggregate`] into a [`ConfidenceReport`].

mod boundary;
mod covariance;
mod mahalanobis;
mod mixture;
mod reconstruction;
mod report;

pub use boundary::{BoundaryModel, BoundaryNormalization, OneClassSvm};
pub use covariance::{CovarianceEstimator, CovarianceModel};
pub use mahalanobis::{distance_to_confidence, mahalanobis_distances, MahalanobisScorer};
pub use mixture::{GaussianMixture, MixtureComponent, MixtureFit, MixtureModel};
pub use reconstruction::ReconstructionScorer;
pub use report::{aggregate, ConfidenceReport, MethodSummary, ScoreRow};

use crate::error::{Result, ScoringError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four scoring methods, in report column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
    Reconstruction,
    Mahalanobis,
    Mixture,
    Boundary,
}

impl ScoringMethod {
    pub const ALL: [ScoringMethod; 4] = [
        ScoringMethod::Reconstruction,
        ScoringMethod::Mahalanobis,
        ScoringMethod::Mixture,
        ScoringMethod::Boundary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Reconstruction => "reconstruction",
            ScoringMethod::Mahalanobis => "mahalanobis",
            ScoringMethod::Mixture => "mixture",
            ScoringMethod::Boundary => "boundary",
        }
    }

    /// Whether a larger value means "more normal".
    ///
    /// Reconstruction error is the only raw anomaly magnitude.
    pub fn higher_is_normal(&self) -> bool {
        !matches!(self, ScoringMethod::Reconstruction)
    }
}

impl fmt::Display for ScoringMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A model fitted on reference latents that can score query latents
pub trait LatentScorer: Send + Sync {
    /// Which report column this scorer fills
    fn method(&self) -> ScoringMethod;

    /// Latent dimensionality the model was fitted on
    fn n_features(&self) -> usize;

    /// Confidence per query row, higher = more normal
    fn score(&self, query: &Array2<f64>) -> Result<Array1<f64>>;
}

/// Reject empty, non-finite or wrongly sized batches before any arithmetic
pub(crate) fn check_batch(x: &Array2<f64>, expected_width: Option<usize>, context: &str) -> Result<()> {
    if let Some(width) = expected_width {
        if x.ncols() != width {
            return Err(ScoringError::dimension(context, width, x.ncols()));
        }
    }
    if x.ncols() == 0 {
        return Err(ScoringError::InvalidInput(format!("{}: vectors have zero length", context)));
    }
    if let Some(pos) = x.iter().position(|v| !v.is_finite()) {
        return Err(ScoringError::InvalidInput(format!(
            "{}: non-finite value at row {}, column {}",
            context,
            pos / x.ncols(),
            pos % x.ncols()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_method_names() {
        let names: Vec<&str> = ScoringMethod::ALL.iter().map(|m| m.as_str()).collect();
        assert_eq!(names, vec!["reconstruction", "mahalanobis", "mixture", "boundary"]);
        assert_eq!(ScoringMethod::Mixture.to_string(), "mixture");
        assert!(!ScoringMethod::Reconstruction.higher_is_normal());
        assert!(ScoringMethod::Boundary.higher_is_normal());
    }

    #[test]
    fn test_check_batch() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        assert!(check_batch(&x, Some(2), "query").is_ok());
        assert!(matches!(
            check_batch(&x, Some(3), "query"),
            Err(ScoringError::DimensionMismatch { expected: 3, actual: 2, .. })
        ));

        let bad = array![[1.0, f64::NAN]];
        assert!(matches!(check_batch(&bad, None, "query"), Err(ScoringError::InvalidInput(_))));
    }
}
