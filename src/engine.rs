//! Scoring engine: fit once on reference latents, score any number of batches

use crate::anomaly::{
    aggregate, BoundaryModel, ConfidenceReport, CovarianceEstimator, GaussianMixture, LatentScorer,
    MahalanobisScorer, MixtureFit, OneClassSvm, ReconstructionScorer,
};
use crate::config::EngineConfig;
use crate::error::{Result, ScoringError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// External model that maps spectra into the latent space and back.
///
/// Implementations must be deterministic for a fixed model state.
pub trait EmbeddingProvider: Send + Sync {
    /// Batch of D-vectors to batch of L-vectors
    fn encode(&self, spectra: &Array2<f64>) -> Result<Array2<f64>>;

    /// Batch of D-vectors to their D-dimensional reconstructions
    fn reconstruct(&self, spectra: &Array2<f64>) -> Result<Array2<f64>>;
}

/// Fitted statistical models plus the configuration they were fitted with.
///
/// Immutable after [`fit`](Self::fit); a new reference batch means a new engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringEngine {
    config: EngineConfig,
    mahalanobis: MahalanobisScorer,
    mixture: MixtureFit,
    boundary: BoundaryModel,
}

impl ScoringEngine {
    /// Fit the covariance, mixture and boundary models on `reference`.
    ///
    /// The three fits are independent and run concurrently. Any failure aborts
    /// the whole fit; mixture non-convergence is only logged.
    pub fn fit(reference: &Array2<f64>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();

        let covariance = CovarianceEstimator::new()
            .with_epsilon(config.covariance_regularization_epsilon)
            .with_max_condition_number(config.max_condition_number)
            .with_max_attempts(config.max_regularization_attempts);

        let mut mixture = GaussianMixture::new(config.n_mixture_components)
            .with_max_iter(config.mixture_max_iterations)
            .with_tol(config.mixture_tolerance)
            .with_reg_covar(config.mixture_reg_covar);
        mixture.random_state = config.random_state;

        let mut boundary = OneClassSvm::new(config.outlier_fraction)
            .with_max_iter(config.boundary_max_iterations)
            .with_normalization(config.boundary_normalization);
        boundary.gamma = config.boundary_gamma;

        let (covariance_model, (mixture_fit, boundary_model)) = rayon::join(
            || covariance.fit(reference),
            || rayon::join(|| mixture.fit(reference), || boundary.fit(reference)),
        );
        let covariance_model = covariance_model?;
        let mixture_fit = mixture_fit?;
        let boundary_model = boundary_model?;

        if let Some(err) = mixture_fit.convergence_error() {
            warn!(error = %err, "Mixture model kept after non-convergence");
        }

        info!(
            n_samples = reference.nrows(),
            n_features = reference.ncols(),
            ridge = covariance_model.regularization,
            mixture_iterations = mixture_fit.n_iter,
            support_vectors = boundary_model.n_support_vectors(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Scoring engine fitted"
        );

        Ok(Self {
            config,
            mahalanobis: MahalanobisScorer::new(covariance_model),
            mixture: mixture_fit,
            boundary: boundary_model,
        })
    }

    /// Encode reference spectra with `provider`, then [`fit`](Self::fit)
    pub fn fit_with_provider(
        provider: &dyn EmbeddingProvider,
        reference_spectra: &Array2<f64>,
        config: EngineConfig,
    ) -> Result<Self> {
        let latents = provider.encode(reference_spectra)?;
        Self::fit(&latents, config)
    }

    /// Score a query batch with all four methods.
    ///
    /// `query` holds latents; `original` and `reconstructed` hold the spectra
    /// those latents came from and their reconstructions. All three must have
    /// the same row count. The four scorers run concurrently.
    pub fn score(
        &self,
        query: &Array2<f64>,
        original: &Array2<f64>,
        reconstructed: &Array2<f64>,
    ) -> Result<ConfidenceReport> {
        if original.nrows() != query.nrows() {
            return Err(ScoringError::dimension(
                "query and original sample count",
                query.nrows(),
                original.nrows(),
            ));
        }

        let ((reconstruction, mahalanobis), (mixture, boundary)) = rayon::join(
            || {
                rayon::join(
                    || ReconstructionScorer::score(original, reconstructed),
                    || self.mahalanobis.score(query),
                )
            },
            || rayon::join(|| self.mixture.model.score(query), || self.boundary.score(query)),
        );

        let report = aggregate(reconstruction?, mahalanobis?, mixture?, boundary?)?;
        info!(n_samples = report.len(), "Scored query batch");
        Ok(report)
    }

    /// Encode and reconstruct raw spectra with `provider`, then [`score`](Self::score)
    pub fn score_spectra(
        &self,
        provider: &dyn EmbeddingProvider,
        spectra: &Array2<f64>,
    ) -> Result<ConfidenceReport> {
        let (latents, reconstructed) =
            rayon::join(|| provider.encode(spectra), || provider.reconstruct(spectra));
        self.score(&latents?, spectra, &reconstructed?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn n_features(&self) -> usize {
        self.mahalanobis.n_features()
    }

    pub fn mahalanobis(&self) -> &MahalanobisScorer {
        &self.mahalanobis
    }

    pub fn mixture(&self) -> &MixtureFit {
        &self.mixture
    }

    pub fn boundary(&self) -> &BoundaryModel {
        &self.boundary
    }

    /// The three fitted statistical scorers, in report column order
    pub fn scorers(&self) -> [&dyn LatentScorer; 3] {
        [&self.mahalanobis, &self.mixture.model, &self.boundary]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::ScoringMethod;

    fn reference() -> Array2<f64> {
        Array2::from_shape_fn((60, 3), |(i, j)| {
            let t = i as f64 * 0.37 + j as f64;
            t.sin() + 0.1 * ((i * (j + 3)) % 7) as f64
        })
    }

    #[test]
    fn test_fit_and_score() {
        let x = reference();
        let engine = ScoringEngine::fit(&x, EngineConfig::new().with_mixture_components(2)).unwrap();
        assert_eq!(engine.n_features(), 3);

        let report = engine.score(&x, &x, &x).unwrap();
        assert_eq!(report.len(), 60);
        assert!(report.reconstruction.iter().all(|&e| e == 0.0));
        assert!(report.mahalanobis.iter().all(|&c| c > 0.0 && c <= 1.0));
        assert!(report.mixture.iter().all(|&c| c > 0.0 && c < 1.0));
        assert!(report.boundary.iter().all(|&c| (0.0..=1.0).contains(&c)));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = ScoringEngine::fit(&reference(), EngineConfig::new().with_outlier_fraction(1.5))
            .unwrap_err();
        assert!(matches!(err, ScoringError::InvalidParameter { .. }));
    }

    #[test]
    fn test_row_count_mismatch() {
        let x = reference();
        let engine = ScoringEngine::fit(&x, EngineConfig::new()).unwrap();
        let err = engine
            .score(&x, &x.slice(ndarray::s![..10, ..]).to_owned(), &x)
            .unwrap_err();
        assert!(matches!(err, ScoringError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_scorers_in_column_order() {
        let engine = ScoringEngine::fit(&reference(), EngineConfig::new()).unwrap();
        let methods: Vec<ScoringMethod> = engine.scorers().iter().map(|s| s.method()).collect();
        assert_eq!(&methods[..], &ScoringMethod::ALL[1..]);
    }
}
