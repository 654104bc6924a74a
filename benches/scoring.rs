use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use latent_anomaly::anomaly::{CovarianceEstimator, GaussianMixture, LatentScorer, OneClassSvm};
use latent_anomaly::{EngineConfig, ScoringEngine};
use ndarray::Array2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_latents(n_rows: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((n_rows, n_features), || rng.gen::<f64>() * 2.0 - 1.0)
}

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("fit");
    group.sample_size(10);

    for n_rows in [250, 500, 1000].iter() {
        let reference = create_latents(*n_rows, 16, 1);

        group.bench_with_input(BenchmarkId::new("covariance", n_rows), &reference, |b, x| {
            b.iter(|| CovarianceEstimator::new().fit(black_box(x)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("mixture", n_rows), &reference, |b, x| {
            b.iter(|| GaussianMixture::new(3).fit(black_box(x)).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("boundary", n_rows), &reference, |b, x| {
            b.iter(|| OneClassSvm::new(0.05).fit(black_box(x)).unwrap())
        });
    }

    group.finish();
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("score");

    let reference = create_latents(500, 16, 2);
    let engine = ScoringEngine::fit(&reference, EngineConfig::default()).unwrap();

    for n_rows in [100, 1000, 10000].iter() {
        let query = create_latents(*n_rows, 16, 3);
        let spectra = create_latents(*n_rows, 64, 4);

        group.bench_with_input(BenchmarkId::new("engine", n_rows), &query, |b, q| {
            b.iter(|| engine.score(black_box(q), &spectra, &spectra).unwrap())
        });
        group.bench_with_input(BenchmarkId::new("mahalanobis", n_rows), &query, |b, q| {
            b.iter(|| engine.mahalanobis().score(black_box(q)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fit, bench_score);
criterion_main!(benches);
