//! Gaussian mixture density model fitted by expectation-maximization

use super::{LatentScorer, ScoringMethod};
use crate::error::{Result, ScoringError};
use crate::linalg::{self, RegularizationPolicy};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, warn};

/// Lloyd iterations used to seed EM responsibilities
const KMEANS_INIT_ITERATIONS: usize = 20;

/// One weighted full-covariance Gaussian
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureComponent {
    /// Mixing weight
    pub weight: f64,
    /// Component mean (length L)
    pub mean: Array1<f64>,
    /// Positive-definite covariance (L x L)
    pub covariance: Array2<f64>,
    /// Inverse Cholesky factor of `covariance`; maps `x - mean` to whitened space
    whitening: Array2<f64>,
    /// `log det(covariance)`
    log_det: f64,
}

impl MixtureComponent {
    fn new(weight: f64, mean: Array1<f64>, covariance: Array2<f64>, policy: RegularizationPolicy) -> Result<Self> {
        let regularized = linalg::regularized_cholesky(&covariance, policy)?;
        let whitening = linalg::invert_lower_triangular(&regularized.cholesky);
        let log_det = linalg::log_det_from_cholesky(&regularized.cholesky);

        Ok(Self {
            weight,
            mean,
            covariance: regularized.matrix,
            whitening,
            log_det,
        })
    }

    /// `log N(x | mean, covariance)` for every row of `x`
    fn log_density(&self, x: &Array2<f64>) -> Array1<f64> {
        let d = self.mean.len() as f64;
        let diff = x - &self.mean;
        let whitened = diff.dot(&self.whitening.t());
        let mahalanobis_sq = whitened.mapv(|v| v * v).sum_axis(Axis(1));
        let constant = d * (2.0 * PI).ln() + self.log_det;

        mahalanobis_sq.mapv(|m| -0.5 * (constant + m))
    }
}

/// Fitted Gaussian mixture. Immutable once returned from [`GaussianMixture::fit`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureModel {
    components: Vec<MixtureComponent>,
    n_features: usize,
}

impl MixtureModel {
    pub fn components(&self) -> &[MixtureComponent] {
        &self.components
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn weights(&self) -> Array1<f64> {
        self.components.iter().map(|c| c.weight).collect()
    }

    /// `log w_k + log N(x | k)` for each sample (rows) and component (columns)
    fn weighted_log_probs(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = Array2::zeros((x.nrows(), self.components.len()));
        for (k, component) in self.components.iter().enumerate() {
            let log_weight = component.weight.ln();
            let density = component.log_density(x);
            out.column_mut(k).assign(&density.mapv(|v| v + log_weight));
        }
        out
    }

    /// Log-likelihood of each query row under the mixture
    pub fn log_likelihood(&self, query: &Array2<f64>) -> Result<Array1<f64>> {
        super::check_batch(query, Some(self.n_features), "mixture query")?;
        let wlp = self.weighted_log_probs(query);

        let values: Vec<f64> = (0..wlp.nrows())
            .into_par_iter()
            .map(|i| log_sum_exp(wlp.row(i)))
            .collect();
        Ok(Array1::from_vec(values))
    }

    /// Index of the most responsible component for each query row
    pub fn predict(&self, query: &Array2<f64>) -> Result<Array1<usize>> {
        super::check_batch(query, Some(self.n_features), "mixture query")?;
        let wlp = self.weighted_log_probs(query);

        let labels: Vec<usize> = (0..wlp.nrows())
            .into_par_iter()
            .map(|i| {
                wlp.row(i)
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (k, &v)| if v > best.1 { (k, v) } else { best })
                    .0
            })
            .collect();
        Ok(Array1::from_vec(labels))
    }
}

impl LatentScorer for MixtureModel {
    fn method(&self) -> ScoringMethod {
        ScoringMethod::Mixture
    }

    fn n_features(&self) -> usize {
        self.n_features
    }

    /// `p / (p + 1)` with `p = exp(log-likelihood)`, kept strictly inside (0, 1)
    fn score(&self, query: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.log_likelihood(query)?.mapv(likelihood_to_confidence))
    }
}

/// Result of a mixture fit with its convergence diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureFit {
    /// Best model found (highest mean log-likelihood)
    pub model: MixtureModel,
    /// Whether the log-likelihood change dropped below tolerance
    pub converged: bool,
    /// EM iterations performed
    pub n_iter: usize,
    /// Mean per-sample log-likelihood of `model` on the reference batch
    pub log_likelihood: f64,
}

impl MixtureFit {
    /// `NonConvergence` when the iteration budget ran out
    pub fn convergence_error(&self) -> Option<ScoringError> {
        if self.converged {
            None
        } else {
            Some(ScoringError::NonConvergence { iterations: self.n_iter })
        }
    }
}

/// Gaussian mixture estimator with full covariances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianMixture {
    pub n_components: usize,
    pub max_iter: usize,
    pub tol: f64,
    pub reg_covar: f64,
    pub random_state: Option<u64>,
}

impl Default for GaussianMixture {
    fn default() -> Self {
        Self::new(3)
    }
}

impl GaussianMixture {
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
            random_state: Some(42),
        }
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter.max(1);
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn policy(&self) -> RegularizationPolicy {
        RegularizationPolicy {
            epsilon: self.reg_covar.max(1e-10),
            max_condition_number: f64::INFINITY,
            max_attempts: 8,
            force: false,
        }
    }

    /// Fit by EM, stopping when the mean log-likelihood changes by less than
    /// `tol` or after `max_iter` iterations. Running out of iterations is not
    /// an error: the best model seen is returned with `converged = false`.
    pub fn fit(&self, reference: &Array2<f64>) -> Result<MixtureFit> {
        if self.n_components == 0 {
            return Err(ScoringError::invalid_parameter(
                "n_components",
                self.n_components,
                "must be positive",
            ));
        }
        let n_samples = reference.nrows();
        if n_samples < self.n_components {
            return Err(ScoringError::insufficient(
                "gaussian mixture",
                self.n_components,
                n_samples,
            ));
        }
        super::check_batch(reference, None, "reference latents")?;

        let mut rng = match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };

        let labels = kmeans_labels(reference, self.n_components, &mut rng);
        let mut resp = Array2::zeros((n_samples, self.n_components));
        for (i, &label) in labels.iter().enumerate() {
            resp[[i, label]] = 1.0;
        }
        let mut model = self.m_step(reference, &resp)?;

        let mut best: Option<(f64, MixtureModel)> = None;
        let mut previous = f64::NEG_INFINITY;
        let mut converged = false;
        let mut n_iter = 0;

        for iter in 1..=self.max_iter {
            n_iter = iter;
            let (log_likelihood, resp) = e_step(&model, reference);

            if best.as_ref().map_or(true, |(b, _)| log_likelihood > *b) {
                best = Some((log_likelihood, model.clone()));
            }

            if (log_likelihood - previous).abs() < self.tol {
                converged = true;
                break;
            }
            previous = log_likelihood;
            model = self.m_step(reference, &resp)?;
        }

        let (log_likelihood, model) = match best {
            Some(found) => found,
            None => (e_step(&model, reference).0, model),
        };

        if converged {
            debug!(n_iter, log_likelihood, n_components = self.n_components, "Gaussian mixture converged");
        } else {
            warn!(
                iterations = n_iter,
                log_likelihood,
                "Gaussian mixture did not converge, returning best model found"
            );
        }

        Ok(MixtureFit {
            model,
            converged,
            n_iter,
            log_likelihood,
        })
    }

    /// Weighted means and covariances from responsibilities
    fn m_step(&self, x: &Array2<f64>, resp: &Array2<f64>) -> Result<MixtureModel> {
        let n_features = x.ncols();
        let policy = self.policy();

        let masses: Vec<f64> = (0..self.n_components)
            .map(|k| resp.column(k).sum() + 10.0 * f64::EPSILON)
            .collect();
        let total_mass: f64 = masses.iter().sum();

        let mut components = Vec::with_capacity(self.n_components);
        for (k, &nk) in masses.iter().enumerate() {
            let r = resp.column(k);
            let mean = r.dot(x) / nk;

            let diff = x - &mean;
            let weighted = &diff * &r.insert_axis(Axis(1));
            let mut covariance = weighted.t().dot(&diff) / nk;
            for i in 0..n_features {
                for j in 0..i {
                    let avg = 0.5 * (covariance[[i, j]] + covariance[[j, i]]);
                    covariance[[i, j]] = avg;
                    covariance[[j, i]] = avg;
                }
                covariance[[i, i]] += self.reg_covar;
            }

            let weight = nk / total_mass;
            components.push(MixtureComponent::new(weight, mean, covariance, policy)?);
        }

        Ok(MixtureModel {
            components,
            n_features,
        })
    }
}

/// Mean log-likelihood and responsibilities under `model`
fn e_step(model: &MixtureModel, x: &Array2<f64>) -> (f64, Array2<f64>) {
    let wlp = model.weighted_log_probs(x);
    let n_samples = x.nrows();
    let n_components = model.n_components();

    let rows: Vec<(f64, Vec<f64>)> = (0..n_samples)
        .into_par_iter()
        .map(|i| {
            let row = wlp.row(i);
            let lse = log_sum_exp(row);
            let resp: Vec<f64> = row.iter().map(|&v| (v - lse).exp()).collect();
            (lse, resp)
        })
        .collect();

    let mut resp = Array2::zeros((n_samples, n_components));
    let mut total = 0.0;
    for (i, (lse, r)) in rows.into_iter().enumerate() {
        total += lse;
        for (k, v) in r.into_iter().enumerate() {
            resp[[i, k]] = v;
        }
    }

    (total / n_samples.max(1) as f64, resp)
}

fn log_sum_exp(values: ArrayView1<f64>) -> f64 {
    let max = values.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// `p / (p + 1)` for `p = exp(log_likelihood)`, evaluated without overflow.
///
/// Underflow floors at the smallest positive normal value and saturation stops
/// one ulp below 1, so the result always lies strictly inside (0, 1).
fn likelihood_to_confidence(log_likelihood: f64) -> f64 {
    let confidence = if log_likelihood >= 0.0 {
        1.0 / (1.0 + (-log_likelihood).exp())
    } else {
        let p = log_likelihood.exp();
        p / (1.0 + p)
    };
    confidence.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON)
}

/// K-means++ seeding followed by a few Lloyd iterations; hard labels only
fn kmeans_labels(x: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let n_samples = x.nrows();
    let n_features = x.ncols();
    let mut centroids = Array2::zeros((k, n_features));

    // Pick first centroid uniformly at random
    let first = (rng.next_u64() as usize) % n_samples;
    centroids.row_mut(0).assign(&x.row(first));

    for c in 1..k {
        let dists: Vec<f64> = (0..n_samples)
            .map(|i| {
                (0..c)
                    .map(|j| euclidean_sq(x, i, &centroids, j))
                    .fold(f64::MAX, f64::min)
            })
            .collect();

        // Weighted random selection proportional to D²
        let total: f64 = dists.iter().sum();
        if total <= 0.0 {
            let idx = (rng.next_u64() as usize) % n_samples;
            centroids.row_mut(c).assign(&x.row(idx));
            continue;
        }

        let r = (rng.next_u64() as f64 / u64::MAX as f64) * total;
        let mut cumulative = 0.0;
        let mut chosen = n_samples - 1;
        for (i, &d) in dists.iter().enumerate() {
            cumulative += d;
            if cumulative >= r && d > 0.0 {
                chosen = i;
                break;
            }
        }
        centroids.row_mut(c).assign(&x.row(chosen));
    }

    let assign = |centroids: &Array2<f64>| -> Vec<usize> {
        (0..n_samples)
            .into_par_iter()
            .map(|i| {
                let mut best_c = 0;
                let mut best_dist = f64::MAX;
                for c in 0..k {
                    let d = euclidean_sq(x, i, centroids, c);
                    if d < best_dist {
                        best_dist = d;
                        best_c = c;
                    }
                }
                best_c
            })
            .collect()
    };

    let mut labels = assign(&centroids);
    for _iter in 0..KMEANS_INIT_ITERATIONS {
        let mut sums = Array2::<f64>::zeros((k, n_features));
        let mut counts = vec![0usize; k];
        for (i, &c) in labels.iter().enumerate() {
            counts[c] += 1;
            let mut row = sums.row_mut(c);
            row += &x.row(i);
        }
        for c in 0..k {
            if counts[c] > 0 {
                let mean = sums.row(c).mapv(|v| v / counts[c] as f64);
                centroids.row_mut(c).assign(&mean);
            } else {
                // Empty cluster: reseed from a random sample
                let idx = (rng.next_u64() as usize) % n_samples;
                centroids.row_mut(c).assign(&x.row(idx));
            }
        }

        let new_labels = assign(&centroids);
        if new_labels == labels {
            break;
        }
        labels = new_labels;
    }

    labels
}

fn euclidean_sq(x: &Array2<f64>, i: usize, centroids: &Array2<f64>, c: usize) -> f64 {
    x.row(i)
        .iter()
        .zip(centroids.row(c).iter())
        .map(|(a, b)| (a - b).powi(2))
        .sum()
}
