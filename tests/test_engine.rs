//! Integration test: engine lifecycle, embedding providers and file I/O

use latent_anomaly::anomaly::{BoundaryNormalization, ScoringMethod};
use latent_anomaly::utils::{save_report_csv, save_report_json, BatchLoader};
use latent_anomaly::{EmbeddingProvider, EngineConfig, Result, ScoringEngine, ScoringError};
use ndarray::{s, Array2};
use polars::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::fs::File;

const SPECTRUM_LEN: usize = 12;
const LATENT_DIM: usize = 4;

/// Keeps the first `LATENT_DIM` channels as the latent code and reconstructs
/// by zero-filling the rest
struct TruncatingProvider;

impl EmbeddingProvider for TruncatingProvider {
    fn encode(&self, spectra: &Array2<f64>) -> Result<Array2<f64>> {
        if spectra.ncols() != SPECTRUM_LEN {
            return Err(ScoringError::DimensionMismatch {
                context: "spectrum length".to_string(),
                expected: SPECTRUM_LEN,
                actual: spectra.ncols(),
            });
        }
        Ok(spectra.slice(s![.., ..LATENT_DIM]).to_owned())
    }

    fn reconstruct(&self, spectra: &Array2<f64>) -> Result<Array2<f64>> {
        let latents = self.encode(spectra)?;
        let mut out = Array2::zeros(spectra.dim());
        out.slice_mut(s![.., ..LATENT_DIM]).assign(&latents);
        Ok(out)
    }
}

fn spectra(n_rows: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_simple_fn((n_rows, SPECTRUM_LEN), || rng.gen::<f64>() * 2.0 - 1.0)
}

fn write_csv(batch: &Array2<f64>, path: &std::path::Path) {
    let columns: Vec<Column> = (0..batch.ncols())
        .map(|j| Series::new(format!("c{}", j).into(), batch.column(j).to_vec()).into())
        .collect();
    let mut df = DataFrame::new(columns).unwrap();
    let mut file = File::create(path).unwrap();
    CsvWriter::new(&mut file).finish(&mut df).unwrap();
}

#[test]
fn test_fit_with_provider_and_score_spectra() {
    let provider = TruncatingProvider;
    let reference = spectra(120, 1);
    let engine = ScoringEngine::fit_with_provider(&provider, &reference, EngineConfig::default()).unwrap();
    assert_eq!(engine.n_features(), LATENT_DIM);

    let mut query = spectra(10, 2);
    query.row_mut(3).fill(0.0);
    query.row_mut(3).slice_mut(s![..LATENT_DIM]).fill(1.0);
    query.row_mut(4).slice_mut(s![LATENT_DIM..]).fill(5.0);

    let report = engine.score_spectra(&provider, &query).unwrap();
    assert_eq!(report.len(), 10);

    // Row 3 has nothing beyond the latent channels, so reconstructs exactly
    assert_eq!(report.reconstruction[3], 0.0);
    // Row 4 carries the most energy in the dropped channels
    assert_eq!(report.rank(ScoringMethod::Reconstruction)[0], 4);
}

#[test]
fn test_provider_errors_propagate() {
    let engine = ScoringEngine::fit_with_provider(&TruncatingProvider, &spectra(50, 3), EngineConfig::default())
        .unwrap();
    let wrong = Array2::zeros((3, SPECTRUM_LEN + 1));
    assert!(matches!(
        engine.score_spectra(&TruncatingProvider, &wrong),
        Err(ScoringError::DimensionMismatch { .. })
    ));
}

#[test]
fn test_engine_reused_across_batches_and_threads() {
    let provider = TruncatingProvider;
    let engine = ScoringEngine::fit_with_provider(&provider, &spectra(100, 4), EngineConfig::default()).unwrap();

    let batch = spectra(20, 5);
    let first = engine.score_spectra(&provider, &batch).unwrap();
    let second = engine.score_spectra(&provider, &batch).unwrap();
    assert_eq!(first, second);

    let reports: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| engine.score_spectra(&provider, &batch).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    for report in reports {
        assert_eq!(report, first);
    }
}

#[test]
fn test_reference_normalization_is_stable_across_batches() {
    let provider = TruncatingProvider;
    let config = EngineConfig::default().with_boundary_normalization(BoundaryNormalization::Reference);
    let engine = ScoringEngine::fit_with_provider(&provider, &spectra(100, 6), config).unwrap();

    let batch = spectra(6, 7);
    let alone = engine.score_spectra(&provider, &batch.slice(s![..1, ..]).to_owned()).unwrap();
    let together = engine.score_spectra(&provider, &batch).unwrap();
    assert_eq!(alone.boundary[0], together.boundary[0]);
}

#[test]
fn test_mismatched_query_and_spectra() {
    let latents = spectra(60, 8).slice(s![.., ..LATENT_DIM]).to_owned();
    let engine = ScoringEngine::fit(&latents, EngineConfig::default()).unwrap();

    let query = latents.slice(s![..5, ..]).to_owned();
    let original = spectra(4, 9);
    let err = engine.score(&query, &original, &original).unwrap_err();
    assert!(matches!(err, ScoringError::DimensionMismatch { expected: 5, actual: 4, .. }));
}

#[test]
fn test_engine_serde_round_trip() {
    let latents = spectra(80, 10).slice(s![.., ..LATENT_DIM]).to_owned();
    let engine = ScoringEngine::fit(&latents, EngineConfig::default()).unwrap();

    let json = serde_json::to_string(&engine).unwrap();
    let restored: ScoringEngine = serde_json::from_str(&json).unwrap();
    assert_eq!(restored.config(), engine.config());

    let query = latents.slice(s![..10, ..]).to_owned();
    let original = spectra(10, 11);
    let a = engine.score(&query, &original, &original).unwrap();
    let b = restored.score(&query, &original, &original).unwrap();
    for (x, y) in a.to_matrix().iter().zip(b.to_matrix().iter()) {
        assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0));
    }
}

#[test]
fn test_csv_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let reference_path = dir.path().join("reference.csv");
    let query_path = dir.path().join("query.csv");

    let latents = spectra(90, 12).slice(s![.., ..LATENT_DIM]).to_owned();
    let query = spectra(7, 13).slice(s![.., ..LATENT_DIM]).to_owned();
    write_csv(&latents, &reference_path);
    write_csv(&query, &query_path);

    let loader = BatchLoader::new();
    let reference = loader.load_batch(&reference_path).unwrap();
    assert_eq!(reference.dim(), (90, LATENT_DIM));
    let info = loader.inspect(&query_path).unwrap();
    assert_eq!((info.n_rows, info.n_cols), (7, LATENT_DIM));

    let engine = ScoringEngine::fit(&reference, EngineConfig::default()).unwrap();
    let query = loader.load_batch(&query_path).unwrap();
    let report = engine.score(&query, &query, &query).unwrap();

    let csv_path = dir.path().join("report.csv");
    save_report_csv(&report, &csv_path).unwrap();
    let written = loader.load_batch(&csv_path).unwrap();
    assert_eq!(written.dim(), (7, 5));
    assert_eq!(written.column(0).to_vec(), (0..7).map(|i| i as f64).collect::<Vec<_>>());

    let json_path = dir.path().join("report.json");
    save_report_json(&report, &json_path).unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
    assert_eq!(value["rows"].as_array().map(|r| r.len()), Some(7));
}
