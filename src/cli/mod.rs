//! Command-line interface for fitting and scoring latent batches from files.

use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::anomaly::{BoundaryNormalization, ConfidenceReport, ScoringMethod};
use crate::config::EngineConfig;
use crate::engine::ScoringEngine;
use crate::utils::{save_report_csv, save_report_json, BatchLoader};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn warn(s: &str) -> ColoredString   { s.truecolor(230, 180, 80) }

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_warn(msg: &str) {
    println!("  {} {}", warn("!"), msg);
}

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "latent-anomaly")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-method anomaly scoring in a learned latent space")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Boundary normalization as accepted on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum NormalizationArg {
    Batch,
    Reference,
}

impl From<NormalizationArg> for BoundaryNormalization {
    fn from(arg: NormalizationArg) -> Self {
        match arg {
            NormalizationArg::Batch => BoundaryNormalization::Batch,
            NormalizationArg::Reference => BoundaryNormalization::Reference,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit on reference latents and score a query batch
    Score {
        /// Reference latents (CSV, one sample per row)
        #[arg(short, long)]
        reference: PathBuf,

        /// Query latents to score
        #[arg(short, long)]
        query: PathBuf,

        /// Original query spectra
        #[arg(long)]
        original: PathBuf,

        /// Reconstructed query spectra
        #[arg(long)]
        reconstructed: PathBuf,

        /// Engine configuration (JSON); flags below override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of mixture components
        #[arg(long)]
        components: Option<usize>,

        /// Expected outlier fraction for the boundary model
        #[arg(long)]
        outlier_fraction: Option<f64>,

        /// How boundary decision values are normalized
        #[arg(long, value_enum)]
        normalization: Option<NormalizationArg>,

        /// Output report (.json writes JSON, anything else CSV)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Number of most anomalous samples to list per method
        #[arg(long, default_value = "5")]
        top: usize,
    },

    /// Show shape and column types of a batch file
    Info {
        /// Batch file
        #[arg(short, long)]
        data: PathBuf,
    },
}

// ─── Score ─────────────────────────────────────────────────────────────────────

/// Options of the `score` subcommand that shape the engine configuration
pub struct ScoreOverrides {
    pub components: Option<usize>,
    pub outlier_fraction: Option<f64>,
    pub normalization: Option<NormalizationArg>,
}

/// Configuration file (or defaults) with command-line overrides applied
pub fn resolve_config(path: Option<&Path>, overrides: &ScoreOverrides) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(p) => EngineConfig::from_json_file(p)?,
        None => EngineConfig::default(),
    };
    if let Some(n) = overrides.components {
        config = config.with_mixture_components(n);
    }
    if let Some(fraction) = overrides.outlier_fraction {
        config = config.with_outlier_fraction(fraction);
    }
    if let Some(normalization) = overrides.normalization {
        config = config.with_boundary_normalization(normalization.into());
    }
    config.validate()?;
    Ok(config)
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_score(
    reference_path: &Path,
    query_path: &Path,
    original_path: &Path,
    reconstructed_path: &Path,
    config_path: Option<&Path>,
    overrides: ScoreOverrides,
    output: Option<&Path>,
    top: usize,
) -> anyhow::Result<()> {
    section("Score");

    let config = resolve_config(config_path, &overrides)?;
    let loader = BatchLoader::new();

    step_run("Loading batches");
    let start = Instant::now();
    let reference = loader.load_batch(reference_path)?;
    let query = loader.load_batch(query_path)?;
    let original = loader.load_batch(original_path)?;
    let reconstructed = loader.load_batch(reconstructed_path)?;
    step_done(&format!(
        "{} reference × {} dims, {} query in {:?}",
        reference.nrows(),
        reference.ncols(),
        query.nrows(),
        start.elapsed()
    ));

    step_run("Fitting models");
    let start = Instant::now();
    let engine = ScoringEngine::fit(&reference, config)?;
    step_done(&format!("{:?}", start.elapsed()));

    let covariance = engine.mahalanobis().model();
    if covariance.is_regularized() {
        step_warn(&format!("covariance ridged by {:.2e}", covariance.regularization));
    }
    if !engine.mixture().converged {
        step_warn(&format!(
            "mixture did not converge in {} iterations, using best model",
            engine.mixture().n_iter
        ));
    }

    step_run("Scoring query");
    let start = Instant::now();
    let report = engine.score(&query, &original, &reconstructed)?;
    step_done(&format!("{} samples in {:?}", report.len(), start.elapsed()));

    print_summary(&report);
    print_top(&report, top);

    if let Some(path) = output {
        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            save_report_json(&report, path)?;
        } else {
            save_report_csv(&report, path)?;
        }
        step_ok(&format!("Report written to {}", path.display()));
    }

    println!();
    Ok(())
}

fn print_summary(report: &ConfidenceReport) {
    let Some(summary) = report.summary() else {
        return;
    };

    println!();
    println!(
        "  {:<16} {:>10} {:>10} {:>10}",
        muted("Method"),
        muted("Min"),
        muted("Mean"),
        muted("Max")
    );
    println!("  {}", dim(&"─".repeat(50)));
    for s in summary {
        println!(
            "  {:<16} {:>10.4} {:>10.4} {:>10.4}",
            s.method.as_str(),
            s.min,
            s.mean,
            s.max
        );
    }
}

fn print_top(report: &ConfidenceReport, top: usize) {
    if top == 0 || report.is_empty() {
        return;
    }

    println!();
    println!("  {}", muted("Most anomalous samples"));
    for method in ScoringMethod::ALL {
        let values = report.get(method);
        let listed: Vec<String> = report
            .rank(method)
            .into_iter()
            .take(top)
            .map(|i| format!("#{} ({:.3})", i, values[i]))
            .collect();
        println!("  {:<16} {}", method.as_str().cyan(), listed.join("  "));
    }
}

// ─── Info ──────────────────────────────────────────────────────────────────────

pub fn cmd_info(data_path: &Path) -> anyhow::Result<()> {
    section("Batch Info");

    let loader = BatchLoader::new();
    let (info, df) = loader.inspect_frame(data_path)?;

    println!("  {:<12} {}", muted("File"), info.path);
    println!("  {:<12} {}", muted("Rows"), info.n_rows);
    println!("  {:<12} {}", muted("Columns"), info.n_cols);
    println!("  {:<12} {:.2} KB", muted("Size"), info.file_size as f64 / 1024.0);
    println!();

    println!("  {:<20} {:<12} {:>6}", muted("Column"), muted("Type"), muted("Nulls"));
    println!("  {}", dim(&"─".repeat(40)));
    for col in df.get_columns() {
        println!(
            "  {:<20} {:<12} {:>6}",
            col.name(),
            format!("{:?}", col.dtype()).truecolor(140, 140, 140),
            col.null_count()
        );
    }

    println!();
    Ok(())
}
