//! Text, JSON, and CSV renderings of finished runs.
mod csv_report;
mod model;
mod text;


use crate::args::OutputFormat;
use crate::error::{AppError, AppResult};
use crate::run::RunOutcome;

pub use model::{
    BatchReport, BatchTestReport, CompareEntryReport, CompareReport, EndpointReport, ErrorGroups,
    LatencyReport, OutcomeReport, RequestRateReport, RunReport,
};
pub use text::TextReport;

/// Render `outcome` in the requested format.
///
/// # Errors
///
/// Returns an error when a histogram cannot be encoded or the JSON or CSV
/// report cannot be written.
pub fn render(outcome: &RunOutcome, format: OutputFormat) -> AppResult<String> {
    match format {
        OutputFormat::Text => Ok(TextReport::new(outcome).to_string()),
        OutputFormat::Json => {
            let report = OutcomeReport::from_outcome(outcome).map_err(AppError::metrics)?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
        OutputFormat::Csv => {
            let report = OutcomeReport::from_outcome(outcome).map_err(AppError::metrics)?;
            csv_report::render_csv(&report)
        }
    }
}
