//! Index-aligned bundle of the four score vectors

use super::ScoringMethod;
use crate::error::{Result, ScoringError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Per-sample scores from every method for one query batch.
///
/// Element `i` of each vector belongs to query row `i`. Reconstruction holds
/// raw mean squared error (higher = more anomalous); the other three hold
/// confidences (higher = more normal).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub reconstruction: Array1<f64>,
    pub mahalanobis: Array1<f64>,
    pub mixture: Array1<f64>,
    pub boundary: Array1<f64>,
}

/// The four scores of a single sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub reconstruction: f64,
    pub mahalanobis: f64,
    pub mixture: f64,
    pub boundary: f64,
}

/// Range and mean of one method's scores over a batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MethodSummary {
    pub method: ScoringMethod,
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// Bundle four score vectors, checking they all have the reconstruction length
pub fn aggregate(
    reconstruction: Array1<f64>,
    mahalanobis: Array1<f64>,
    mixture: Array1<f64>,
    boundary: Array1<f64>,
) -> Result<ConfidenceReport> {
    let expected = reconstruction.len();
    for (method, len) in [
        (ScoringMethod::Mahalanobis, mahalanobis.len()),
        (ScoringMethod::Mixture, mixture.len()),
        (ScoringMethod::Boundary, boundary.len()),
    ] {
        if len != expected {
            return Err(ScoringError::LengthMismatch {
                method: method.to_string(),
                expected,
                actual: len,
            });
        }
    }

    Ok(ConfidenceReport {
        reconstruction,
        mahalanobis,
        mixture,
        boundary,
    })
}

impl ConfidenceReport {
    /// Number of scored samples
    pub fn len(&self) -> usize {
        self.reconstruction.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reconstruction.is_empty()
    }

    /// Column names in [`to_matrix`](Self::to_matrix) order
    pub fn method_names() -> [&'static str; 4] {
        ScoringMethod::ALL.map(|m| m.as_str())
    }

    pub fn get(&self, method: ScoringMethod) -> &Array1<f64> {
        match method {
            ScoringMethod::Reconstruction => &self.reconstruction,
            ScoringMethod::Mahalanobis => &self.mahalanobis,
            ScoringMethod::Mixture => &self.mixture,
            ScoringMethod::Boundary => &self.boundary,
        }
    }

    /// Scores of sample `index`, or `None` past the end
    pub fn row(&self, index: usize) -> Option<ScoreRow> {
        if index >= self.len() {
            return None;
        }
        Some(ScoreRow {
            reconstruction: self.reconstruction[index],
            mahalanobis: self.mahalanobis[index],
            mixture: self.mixture[index],
            boundary: self.boundary[index],
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = ScoreRow> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    /// One row per sample, one column per method
    pub fn to_matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.len(), ScoringMethod::ALL.len()));
        for (col, method) in ScoringMethod::ALL.iter().enumerate() {
            matrix.column_mut(col).assign(self.get(*method));
        }
        matrix
    }

    /// Min, mean and max per method; `None` for an empty report
    pub fn summary(&self) -> Option<Vec<MethodSummary>> {
        if self.is_empty() {
            return None;
        }
        let summaries = ScoringMethod::ALL
            .iter()
            .map(|&method| {
                let values = self.get(method);
                MethodSummary {
                    method,
                    min: values.iter().copied().fold(f64::INFINITY, f64::min),
                    mean: values.sum() / values.len() as f64,
                    max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                }
            })
            .collect();
        Some(summaries)
    }

    /// Sample indices ordered from most to least anomalous under `method`
    pub fn rank(&self, method: ScoringMethod) -> Vec<usize> {
        let values = self.get(method);
        let mut indices: Vec<usize> = (0..values.len()).collect();
        if method.higher_is_normal() {
            indices.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        } else {
            indices.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
        }
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn report() -> ConfidenceReport {
        aggregate(
            array![0.1, 2.0, 0.4],
            array![0.9, 0.2, 0.6],
            array![0.8, 0.1, 0.5],
            array![1.0, 0.0, 0.7],
        )
        .unwrap()
    }

    #[test]
    fn test_aggregate_packages_unchanged() {
        let r = report();
        assert_eq!(r.len(), 3);
        assert_eq!(r.mahalanobis, array![0.9, 0.2, 0.6]);
        assert_eq!(
            r.row(1),
            Some(ScoreRow {
                reconstruction: 2.0,
                mahalanobis: 0.2,
                mixture: 0.1,
                boundary: 0.0,
            })
        );
        assert_eq!(r.row(3), None);
        assert_eq!(r.rows().count(), 3);
    }

    #[test]
    fn test_length_mismatch_names_method() {
        let err = aggregate(
            Array1::zeros(100),
            Array1::zeros(99),
            Array1::zeros(100),
            Array1::zeros(100),
        )
        .unwrap_err();

        match err {
            ScoringError::LengthMismatch { method, expected, actual } => {
                assert_eq!(method, "mahalanobis");
                assert_eq!(expected, 100);
                assert_eq!(actual, 99);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_report() {
        let r = aggregate(
            Array1::zeros(0),
            Array1::zeros(0),
            Array1::zeros(0),
            Array1::zeros(0),
        )
        .unwrap();
        assert!(r.is_empty());
        assert!(r.summary().is_none());
        assert_eq!(r.to_matrix().dim(), (0, 4));
    }

    #[test]
    fn test_to_matrix_column_order() {
        let m = report().to_matrix();
        assert_eq!(m.dim(), (3, 4));
        assert_eq!(m.row(2).to_vec(), vec![0.4, 0.6, 0.5, 0.7]);
        assert_eq!(
            ConfidenceReport::method_names(),
            ["reconstruction", "mahalanobis", "mixture", "boundary"]
        );
    }

    #[test]
    fn test_rank_respects_direction() {
        let r = report();
        // Largest error first
        assert_eq!(r.rank(ScoringMethod::Reconstruction), vec![1, 2, 0]);
        // Lowest confidence first
        assert_eq!(r.rank(ScoringMethod::Boundary), vec![1, 2, 0]);
    }

    #[test]
    fn test_summary() {
        let summary = report().summary().unwrap();
        assert_eq!(summary.len(), 4);
        let boundary = summary[3];
        assert_eq!(boundary.method, ScoringMethod::Boundary);
        assert_eq!(boundary.min, 0.0);
        assert_eq!(boundary.max, 1.0);
        assert!((boundary.mean - 1.7 / 3.0).abs() < 1e-12);
    }
}
