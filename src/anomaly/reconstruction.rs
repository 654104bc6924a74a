//! Reconstruction error scoring

use crate::error::{Result, ScoringError};
use ndarray::{Array1, Array2};
use rayon::prelude::*;

/// Per-sample mean squared error between spectra and their reconstructions.
///
/// Higher = more anomalous, unbounded above. Needs no fitting.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconstructionScorer;

impl ReconstructionScorer {
    /// Mean over dimensions of the squared per-dimension error, one value per row
    pub fn score(original: &Array2<f64>, reconstructed: &Array2<f64>) -> Result<Array1<f64>> {
        if original.nrows() != reconstructed.nrows() {
            return Err(ScoringError::dimension(
                "reconstruction sample count",
                original.nrows(),
                reconstructed.nrows(),
            ));
        }
        if original.ncols() != reconstructed.ncols() {
            return Err(ScoringError::dimension(
                "reconstruction vector length",
                original.ncols(),
                reconstructed.ncols(),
            ));
        }
        super::check_batch(original, None, "original spectra")?;
        super::check_batch(reconstructed, None, "reconstructed spectra")?;

        let d = original.ncols() as f64;
        let errors: Vec<f64> = (0..original.nrows())
            .into_par_iter()
            .map(|i| {
                original
                    .row(i)
                    .iter()
                    .zip(reconstructed.row(i).iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    / d
            })
            .collect();

        Ok(Array1::from_vec(errors))
    }

    /// Map an error onto (0, 1] with `1 / (1 + mse)`, higher = more normal
    pub fn to_confidence(errors: &Array1<f64>) -> Array1<f64> {
        errors.mapv(|e| 1.0 / (1.0 + e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_identical_is_zero() {
        let x = array![[1.0, 2.0, 3.0], [0.5, -0.5, 0.0]];
        let scores = ReconstructionScorer::score(&x, &x).unwrap();
        assert_eq!(scores, array![0.0, 0.0]);
    }

    #[test]
    fn test_mean_squared_error() {
        let original = array![[1.0, 2.0, 3.0, 4.0]];
        let reconstructed = array![[1.0, 2.0, 3.0, 6.0]];
        let scores = ReconstructionScorer::score(&original, &reconstructed).unwrap();
        assert_eq!(scores[0], 1.0);
    }

    #[test]
    fn test_tiny_difference_is_positive() {
        let original = array![[1.0, 1.0]];
        let reconstructed = array![[1.0, 1.0 + 1e-9]];
        let scores = ReconstructionScorer::score(&original, &reconstructed).unwrap();
        assert!(scores[0] > 0.0);
    }

    #[test]
    fn test_mismatched_rows() {
        let original = Array2::<f64>::zeros((3, 4));
        let reconstructed = Array2::<f64>::zeros((2, 4));
        let err = ReconstructionScorer::score(&original, &reconstructed).unwrap_err();
        assert!(matches!(err, ScoringError::DimensionMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_mismatched_width() {
        let original = Array2::<f64>::zeros((2, 4));
        let reconstructed = Array2::<f64>::zeros((2, 5));
        let err = ReconstructionScorer::score(&original, &reconstructed).unwrap_err();
        assert!(matches!(err, ScoringError::DimensionMismatch { expected: 4, actual: 5, .. }));
    }

    #[test]
    fn test_to_confidence() {
        let conf = ReconstructionScorer::to_confidence(&array![0.0, 1.0, 3.0]);
        assert_eq!(conf, array![1.0, 0.5, 0.25]);
    }
}
