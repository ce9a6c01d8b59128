//! Batch output formatting.

pub mod format;

pub use format::{format_statistics_header, format_statistics_row, format_run_summary, CurveStats};
