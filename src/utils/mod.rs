//! File I/O for batches and reports

pub mod data_loader;

pub use data_loader::{
    dataframe_to_array2, report_to_dataframe, save_report_csv, save_report_json, BatchInfo,
    BatchLoader,
};
