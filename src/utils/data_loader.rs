//! Loading latent and spectrum batches, and exporting confidence reports

use crate::anomaly::{ConfidenceReport, MethodSummary, ScoreRow};
use crate::error::{Result, ScoringError};
use ndarray::Array2;
use polars::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

/// Loader for numeric batches stored one sample per row
pub struct BatchLoader {
    has_header: bool,
    separator: u8,
}

impl Default for BatchLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchLoader {
    pub fn new() -> Self {
        Self {
            has_header: true,
            separator: b',',
        }
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Read a delimited file into a DataFrame
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let file = File::open(path.as_ref())
            .map_err(|e| ScoringError::DataError(format!("{}: {}", path.as_ref().display(), e)))?;

        let parse_opts = CsvParseOptions::default().with_separator(self.separator);

        CsvReadOptions::default()
            .with_has_header(self.has_header)
            .with_infer_schema_length(Some(100))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()
            .map_err(|e| ScoringError::DataError(e.to_string()))
    }

    /// Read a file where every column is one vector component
    pub fn load_batch(&self, path: impl AsRef<Path>) -> Result<Array2<f64>> {
        let start = Instant::now();
        let df = self.load_csv(path.as_ref())?;
        let batch = dataframe_to_array2(&df)?;
        debug!(
            path = %path.as_ref().display(),
            n_rows = batch.nrows(),
            n_cols = batch.ncols(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Loaded batch"
        );
        Ok(batch)
    }

    /// Shape and column names of a file
    pub fn inspect(&self, path: impl AsRef<Path>) -> Result<BatchInfo> {
        Ok(self.inspect_frame(path)?.0)
    }

    /// Summary of a file together with the frame it was read into
    pub fn inspect_frame(&self, path: impl AsRef<Path>) -> Result<(BatchInfo, DataFrame)> {
        let file_size = std::fs::metadata(path.as_ref())?.len();
        let df = self.load_csv(path.as_ref())?;
        let info = BatchInfo::from_frame(path, file_size, &df);
        Ok((info, df))
    }
}

/// Summary of a batch file
#[derive(Debug, Clone)]
pub struct BatchInfo {
    pub path: String,
    pub file_size: u64,
    pub n_rows: usize,
    pub n_cols: usize,
    pub columns: Vec<String>,
}

impl BatchInfo {
    pub fn from_frame(path: impl AsRef<Path>, file_size: u64, df: &DataFrame) -> Self {
        Self {
            path: path.as_ref().display().to_string(),
            file_size,
            n_rows: df.height(),
            n_cols: df.width(),
            columns: df.get_column_names().iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Every column of `df` cast to f64, row-major. Missing or unparsable cells
/// are rejected rather than filled.
pub fn dataframe_to_array2(df: &DataFrame) -> Result<Array2<f64>> {
    let n_rows = df.height();
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();

    let col_data: Vec<Vec<f64>> = names
        .iter()
        .map(|name| {
            let column = df
                .column(name)
                .map_err(|e| ScoringError::DataError(e.to_string()))?;
            let as_f64 = column
                .cast(&DataType::Float64)
                .map_err(|e| ScoringError::DataError(e.to_string()))?;
            let values = as_f64
                .f64()
                .map_err(|e| ScoringError::DataError(e.to_string()))?;
            if values.null_count() > 0 {
                return Err(ScoringError::DataError(format!(
                    "column '{}' has {} missing or non-numeric values",
                    name,
                    values.null_count()
                )));
            }
            Ok(values.into_no_null_iter().collect())
        })
        .collect::<Result<Vec<Vec<f64>>>>()?;

    let col_refs: Vec<&[f64]> = col_data.iter().map(|c| c.as_slice()).collect();
    Ok(Array2::from_shape_fn((n_rows, names.len()), |(r, c)| col_refs[c][r]))
}

/// One row per sample, one column per method, plus a leading sample index
pub fn report_to_dataframe(report: &ConfidenceReport) -> Result<DataFrame> {
    let index: Vec<u32> = (0..report.len() as u32).collect();
    let mut columns: Vec<Column> = vec![Series::new("sample".into(), index).into()];
    for method in crate::anomaly::ScoringMethod::ALL {
        columns.push(Series::new(method.as_str().into(), report.get(method).to_vec()).into());
    }
    Ok(DataFrame::new(columns)?)
}

/// Write a report as CSV
pub fn save_report_csv(report: &ConfidenceReport, path: impl AsRef<Path>) -> Result<()> {
    let mut df = report_to_dataframe(report)?;
    let mut file = File::create(path.as_ref())?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

#[derive(Serialize)]
struct ReportDocument {
    n_samples: usize,
    summary: Vec<MethodSummary>,
    rows: Vec<ScoreRow>,
}

/// Write a report as JSON: per-method summary plus one object per sample
pub fn save_report_json(report: &ConfidenceReport, path: impl AsRef<Path>) -> Result<()> {
    let document = ReportDocument {
        n_samples: report.len(),
        summary: report.summary().unwrap_or_default(),
        rows: report.rows().collect(),
    };
    let file = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(file, &document)?;
    Ok(())
}
