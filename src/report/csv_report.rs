use serde::Serialize;

use crate::error::{AppError, AppResult};

use super::model::{BatchReport, CompareReport, EndpointReport, OutcomeReport, RunReport};

/// One row per batch test.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchRow<'report> {
    name: &'report str,
    status: &'static str,
    duration: String,
    requests: u64,
    #[serde(rename = "RPS")]
    rps: String,
    avg_latency: String,
    errors: u64,
    error: &'report str,
}

/// One row for the whole run, then one per endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct EndpointRow<'report> {
    endpoint: &'report str,
    requests: u64,
    successes: u64,
    transport_failures: u64,
    assertion_failures: u64,
    success_rate: String,
    #[serde(rename = "RPS")]
    rps: String,
    min_latency_us: u64,
    mean_latency_us: u64,
    p95_latency_us: u64,
    p99_latency_us: u64,
    max_latency_us: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ComparisonRow<'report> {
    pair: &'report str,
    rule: &'report str,
    status: &'static str,
    base_value: &'report str,
    target_value: &'report str,
    reason: &'report str,
}

/// Render a report as CSV with a header row.
///
/// # Errors
///
/// Returns an error when a row cannot be written.
pub(super) fn render_csv(report: &OutcomeReport) -> AppResult<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    match report {
        OutcomeReport::Benchmark(run) => write_run(&mut writer, run)?,
        OutcomeReport::Batch(batch) => write_batch(&mut writer, batch)?,
        OutcomeReport::Compare(compare) => write_compare(&mut writer, compare)?,
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| AppError::from(csv::Error::from(err.into_error())))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn write_run(writer: &mut csv::Writer<Vec<u8>>, run: &RunReport) -> Result<(), csv::Error> {
    writer.serialize(endpoint_row("all", &run.overall))?;
    if run.endpoints.len() > 1 {
        for endpoint in &run.endpoints {
            writer.serialize(endpoint_row(&endpoint.label, endpoint))?;
        }
    }
    Ok(())
}

fn endpoint_row<'report>(label: &'report str, endpoint: &EndpointReport) -> EndpointRow<'report> {
    EndpointRow {
        endpoint: label,
        requests: endpoint.requests,
        successes: endpoint.successes,
        transport_failures: endpoint.transport_failures,
        assertion_failures: endpoint.assertion_failures,
        success_rate: format!("{:.2}", endpoint.success_rate),
        rps: format!("{:.2}", endpoint.requests_per_sec),
        min_latency_us: endpoint.latency.min_us,
        mean_latency_us: endpoint.latency.mean_us,
        p95_latency_us: endpoint.latency.p95_us,
        p99_latency_us: endpoint.latency.p99_us,
        max_latency_us: endpoint.latency.max_us,
    }
}

fn write_batch(writer: &mut csv::Writer<Vec<u8>>, batch: &BatchReport) -> Result<(), csv::Error> {
    if batch.tests.is_empty() {
        writer.write_record([
            "Name",
            "Status",
            "Duration",
            "Requests",
            "RPS",
            "AvgLatency",
            "Errors",
            "Error",
        ])?;
    }
    for test in &batch.tests {
        let overall = test.result.as_ref().map(|run| &run.overall);
        writer.serialize(BatchRow {
            name: &test.name,
            status: if test.success { "PASS" } else { "FAIL" },
            duration: overall.map_or_else(String::new, |overall| format!("{}ms", overall.elapsed_ms)),
            requests: overall.map_or(0, |overall| overall.requests),
            rps: overall.map_or_else(String::new, |overall| {
                format!("{:.2}", overall.requests_per_sec)
            }),
            avg_latency: overall.map_or_else(String::new, |overall| {
                format!("{:.2}ms", overall.latency.mean_us as f64 / 1000.0)
            }),
            errors: overall.map_or(0, |overall| {
                overall
                    .transport_failures
                    .saturating_add(overall.assertion_failures)
            }),
            error: test.error.as_deref().unwrap_or_default(),
        })?;
    }
    Ok(())
}

fn write_compare(
    writer: &mut csv::Writer<Vec<u8>>,
    compare: &CompareReport,
) -> Result<(), csv::Error> {
    if compare.comparisons.is_empty() {
        writer.write_record(["Pair", "Rule", "Status", "BaseValue", "TargetValue", "Reason"])?;
    }
    for comparison in &compare.comparisons {
        writer.serialize(ComparisonRow {
            pair: comparison.label.as_str(),
            rule: &comparison.rule,
            status: if comparison.passed { "PASS" } else { "FAIL" },
            base_value: &comparison.base_value,
            target_value: &comparison.target_value,
            reason: &comparison.reason,
        })?;
    }
    Ok(())
}
