//! LineBench Report - Result Rendering
//!
//! Generates the output formats for a measurement run:
//! - Human (terminal latency block)
//! - JSON (machine-readable)
//! - CSV (spreadsheet-compatible)

mod csv;
mod json;
mod report;

pub use csv::generate_csv_report;
pub use json::generate_json_report;
pub use report::{
    format_latency_block, LatencyMetrics, LatencyStats, Report, ReportMeta, RunInfo, SystemInfo,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable terminal output
    #[default]
    Human,
    /// JSON with full metadata
    Json,
    /// CSV for spreadsheets
    Csv,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "text" => Ok(OutputFormat::Human),
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}
