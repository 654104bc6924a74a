//! Mahalanobis distance confidence

use super::{CovarianceModel, LatentScorer, ScoringMethod};
use crate::error::Result;
use ndarray::{Array1, Array2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Mahalanobis distance of every query row to the model mean.
///
/// Batched as `rowsum((X - μ) Σ⁻¹ ∘ (X - μ))`. Each row of `X - μ` is first
/// divided by its largest magnitude so the quadratic form cannot overflow;
/// negative round-off is clamped to zero so `d ≥ 0` always.
pub fn mahalanobis_distances(model: &CovarianceModel, query: &Array2<f64>) -> Result<Array1<f64>> {
    super::check_batch(query, Some(model.n_features()), "mahalanobis query")?;

    let diff = query - &model.mean;
    let scale = diff.map_axis(Axis(1), |row| row.iter().fold(0.0f64, |m, v| m.max(v.abs())));
    let divisor = scale.mapv(|s| if s > 0.0 && s.is_finite() { s } else { 1.0 });
    let unit = &diff / &divisor.insert_axis(Axis(1));

    let projected = unit.dot(&model.inverse_covariance);
    let quadratic = (&projected * &unit).sum_axis(Axis(1));

    Ok(Zip::from(&quadratic).and(&scale).map_collect(|&q, &s| {
        if s.is_finite() {
            s * q.max(0.0).sqrt()
        } else {
            f64::INFINITY
        }
    }))
}

/// `1 / (1 + d)`: exactly 1 at `d = 0`, decreasing, floored at
/// `f64::MIN_POSITIVE` so an infinite distance still scores above zero
pub fn distance_to_confidence(distance: f64) -> f64 {
    (1.0 / (1.0 + distance)).max(f64::MIN_POSITIVE)
}

/// Distance-based confidence against a fitted [`CovarianceModel`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MahalanobisScorer {
    model: CovarianceModel,
}

impl MahalanobisScorer {
    pub fn new(model: CovarianceModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &CovarianceModel {
        &self.model
    }

    /// Raw distances, without the confidence mapping
    pub fn distances(&self, query: &Array2<f64>) -> Result<Array1<f64>> {
        mahalanobis_distances(&self.model, query)
    }
}

impl LatentScorer for MahalanobisScorer {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Mahalanobis
    }

    fn n_features(&self) -> usize {
        self.model.n_features()
    }

    fn score(&self, query: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.distances(query)?.mapv(distance_to_confidence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::CovarianceEstimator;
    use crate::error::ScoringError;
    use ndarray::array;

    fn fitted() -> CovarianceModel {
        let data: Vec<f64> = (0..30)
            .flat_map(|i| {
                let a = (i % 6) as f64;
                let b = ((i * 7) % 5) as f64;
                vec![a, 0.5 * a + b, b * b - 1.0]
            })
            .collect();
        let x = Array2::from_shape_vec((30, 3), data).unwrap();
        CovarianceEstimator::new().fit(&x).unwrap()
    }

    /// Per-sample reference form of the distance
    fn naive_distance(model: &CovarianceModel, v: &[f64]) -> f64 {
        let n = v.len();
        let diff: Vec<f64> = v.iter().zip(model.mean.iter()).map(|(a, b)| a - b).collect();
        let mut result = 0.0;
        for i in 0..n {
            for j in 0..n {
                result += diff[i] * model.inverse_covariance[[i, j]] * diff[j];
            }
        }
        result.max(0.0).sqrt()
    }

    #[test]
    fn test_mean_has_confidence_one() {
        let model = fitted();
        let query = model.mean.clone().insert_axis(Axis(0));
        let scorer = MahalanobisScorer::new(model);
        let conf = scorer.score(&query).unwrap();
        assert_eq!(conf[0], 1.0);
    }

    #[test]
    fn test_strictly_decreasing_along_direction() {
        let model = fitted();
        let direction = array![1.0, -0.5, 2.0];
        let steps: Vec<f64> = (0..10).map(|k| k as f64 * 0.7).collect();
        let mut query = Array2::zeros((steps.len(), 3));
        for (row, &t) in steps.iter().enumerate() {
            let point = &model.mean + &(&direction * t);
            query.row_mut(row).assign(&point);
        }

        let conf = MahalanobisScorer::new(model).score(&query).unwrap();
        for w in conf.windows(2) {
            assert!(w[1] < w[0], "confidence must strictly decrease: {:?}", conf);
        }
        assert!(conf.iter().all(|&c| c > 0.0 && c <= 1.0));
    }

    #[test]
    fn test_batched_matches_per_sample() {
        let model = fitted();
        let query = array![[0.0, 0.0, 0.0], [5.0, 1.0, -3.0], [2.5, 3.1, 0.7], [-4.0, 9.0, 2.0]];
        let batched = mahalanobis_distances(&model, &query).unwrap();

        for (i, row) in query.rows().into_iter().enumerate() {
            let v: Vec<f64> = row.to_vec();
            let expected = naive_distance(&model, &v);
            assert!((batched[i] - expected).abs() < 1e-9 * expected.max(1.0));
        }
    }

    #[test]
    fn test_wrong_width_fails() {
        let scorer = MahalanobisScorer::new(fitted());
        let err = scorer.score(&array![[1.0, 2.0]]).unwrap_err();
        assert!(matches!(err, ScoringError::DimensionMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn test_distance_to_confidence() {
        assert_eq!(distance_to_confidence(0.0), 1.0);
        assert_eq!(distance_to_confidence(1.0), 0.5);
        assert!(distance_to_confidence(1e9) > 0.0);
        assert_eq!(distance_to_confidence(f64::INFINITY), f64::MIN_POSITIVE);
    }

    #[test]
    fn test_huge_query_stays_positive() {
        let scorer = MahalanobisScorer::new(fitted());
        let query = array![[1e200, 1e200, 1e200], [1.7e308, 0.0, 0.0], [-1e200, 3e199, 1e200]];

        let distances = scorer.distances(&query).unwrap();
        assert!(distances.iter().all(|&d| d > 1e190), "{:?}", distances);

        let conf = scorer.score(&query).unwrap();
        assert!(conf.iter().all(|&c| c > 0.0 && c < 1e-150), "{:?}", conf);
    }
}
