//! Latent-space anomaly scoring
//!
//! Scores spectra that an external model has embedded into a latent space,
//! using four independent views of "normal":
//! - reconstruction error of the embedding model
//! - Mahalanobis distance to the reference mean
//! - likelihood under a Gaussian mixture
//! - signed distance to a one-class SVM boundary
//!
//! # Modules
//!
//! - [`anomaly`] - the four scorers and the [`ConfidenceReport`] aggregator
//! - [`engine`] - [`ScoringEngine`], fit once on reference latents and reuse
//! - [`linalg`] - Cholesky, triangular inverse, regularization
//! - [`config`] - serializable engine configuration
//! - [`utils`] - CSV batch loading and report export
//! - [`cli`] - command-line interface
//!
//! # Example
//!
//! ```no_run
//! use latent_anomaly::prelude::*;
//! use ndarray::Array2;
//!
//! # fn main() -> latent_anomaly::Result<()> {
//! let reference = Array2::<f64>::zeros((500, 16));
//! let engine = ScoringEngine::fit(&reference, EngineConfig::default())?;
//!
//! let query = Array2::<f64>::zeros((10, 16));
//! let spectra = Array2::<f64>::zeros((10, 128));
//! let report = engine.score(&query, &spectra, &spectra)?;
//! println!("{:?}", report.summary());
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod config;
pub mod linalg;
pub mod anomaly;
pub mod engine;
pub mod utils;
pub mod cli;

pub use anomaly::{aggregate, ConfidenceReport, ScoringMethod};
pub use config::EngineConfig;
pub use engine::{EmbeddingProvider, ScoringEngine};
pub use error::{Result, ScoringError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Result, ScoringError};

    pub use crate::config::EngineConfig;
    pub use crate::engine::{EmbeddingProvider, ScoringEngine};

    pub use crate::anomaly::{
        aggregate, BoundaryModel, BoundaryNormalization, ConfidenceReport, CovarianceEstimator,
        CovarianceModel, GaussianMixture, LatentScorer, MahalanobisScorer, MixtureFit, MixtureModel,
        OneClassSvm, ReconstructionScorer, ScoringMethod,
    };

    pub use crate::utils::{save_report_csv, save_report_json, BatchLoader};
}
