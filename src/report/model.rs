use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::compare::{ComparisonResult, CompareEntry, CompareOutcome, Side, UnpairedEntry};
use crate::error::MetricsError;
use crate::metrics::{LatencySummary, RunResult, StatsSnapshot};
use crate::run::{BatchOutcome, BatchTestResult, RunOutcome};

/// Serializable result of any run mode, tagged by `mode`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutcomeReport {
    Benchmark(Box<RunReport>),
    Batch(BatchReport),
    Compare(CompareReport),
}

impl OutcomeReport {
    /// # Errors
    ///
    /// Returns an error when a latency histogram cannot be encoded.
    pub fn from_outcome(outcome: &RunOutcome) -> Result<Self, MetricsError> {
        Ok(match outcome {
            RunOutcome::Benchmark(result) => {
                OutcomeReport::Benchmark(Box::new(RunReport::from_result(result)?))
            }
            RunOutcome::Batch(batch) => OutcomeReport::Batch(BatchReport::from_outcome(batch)?),
            RunOutcome::Compare(compare) => {
                OutcomeReport::Compare(CompareReport::from_outcome(compare))
            }
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub interrupted: bool,
    pub elapsed_ms: u64,
    pub total_issued: u64,
    pub overall: EndpointReport,
    pub endpoints: Vec<EndpointReport>,
    pub request_rate: RequestRateReport,
}

impl RunReport {
    /// # Errors
    ///
    /// Returns an error when a latency histogram cannot be encoded.
    pub fn from_result(result: &RunResult) -> Result<Self, MetricsError> {
        Ok(Self {
            success: result.is_success(),
            interrupted: result.interrupted,
            elapsed_ms: millis(result.elapsed),
            total_issued: result.total_issued,
            overall: EndpointReport::from_snapshot(&result.overall, result.elapsed)?,
            endpoints: result
                .endpoints
                .iter()
                .map(|endpoint| EndpointReport::from_snapshot(endpoint, result.elapsed))
                .collect::<Result<Vec<_>, _>>()?,
            request_rate: RequestRateReport::from_ticks(&result.tick_counts, result.sample_interval),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub label: String,
    pub requests: u64,
    pub successes: u64,
    pub transport_failures: u64,
    pub assertion_failures: u64,
    /// Percent with two decimals.
    pub success_rate: f64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub requests_per_sec: f64,
    pub elapsed_ms: u64,
    pub latency: LatencyReport,
    pub status_counts: BTreeMap<u16, u64>,
    pub errors: ErrorGroups,
    /// Base64 V2-deflate HDR histogram of latencies in microseconds.
    pub histogram: String,
}

impl EndpointReport {
    /// # Errors
    ///
    /// Returns an error when the latency histogram cannot be encoded.
    pub fn from_snapshot(snapshot: &StatsSnapshot, elapsed: Duration) -> Result<Self, MetricsError> {
        Ok(Self {
            label: snapshot.label.clone(),
            requests: snapshot.requests,
            successes: snapshot.successes,
            transport_failures: snapshot.transport_failures,
            assertion_failures: snapshot.assertion_failures,
            success_rate: from_x100(snapshot.success_rate_x100()),
            read_bytes: snapshot.read_bytes,
            write_bytes: snapshot.write_bytes,
            requests_per_sec: from_x100(snapshot.rps_x100(elapsed)),
            elapsed_ms: millis(elapsed),
            latency: LatencyReport::from(&snapshot.latency),
            status_counts: snapshot.status_counts.clone(),
            errors: ErrorGroups {
                transport: snapshot.transport_errors.clone(),
                assertion: snapshot.assertion_errors.clone(),
            },
            histogram: snapshot.histogram.encode_base64()?,
        })
    }
}

/// Latencies in microseconds.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct LatencyReport {
    pub min_us: u64,
    pub mean_us: u64,
    pub max_us: u64,
    pub p50_us: u64,
    pub p75_us: u64,
    pub p90_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
}

impl From<&LatencySummary> for LatencyReport {
    fn from(summary: &LatencySummary) -> Self {
        Self {
            min_us: micros(summary.min),
            mean_us: micros(summary.mean),
            max_us: micros(summary.max),
            p50_us: micros(summary.p50),
            p75_us: micros(summary.p75),
            p90_us: micros(summary.p90),
            p95_us: micros(summary.p95),
            p99_us: micros(summary.p99),
        }
    }
}

/// Error messages with occurrence counts, kept apart by kind.
#[derive(Debug, Clone, Serialize, Default)]
pub struct ErrorGroups {
    pub transport: BTreeMap<String, u64>,
    pub assertion: BTreeMap<String, u64>,
}

/// Requests per second derived from sampler ticks. The final tick is partial
/// and is left out when there is more than one.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct RequestRateReport {
    pub interval_ms: u64,
    pub ticks: u64,
    pub mean_per_sec_x100: u64,
    pub max_per_sec_x100: u64,
}

impl RequestRateReport {
    #[must_use]
    pub fn from_ticks(ticks: &[u64], interval: Duration) -> Self {
        let full = match ticks.split_last() {
            Some((_, full)) if !full.is_empty() => full,
            Some(_) | None => ticks,
        };
        let interval_ms = millis(interval).max(1);
        let per_sec_x100 = |count: u128| -> u64 {
            let scaled = count
                .saturating_mul(100_000)
                .checked_div(u128::from(interval_ms))
                .unwrap_or(0);
            u64::try_from(scaled).unwrap_or(u64::MAX)
        };
        let total: u128 = full.iter().map(|tick| u128::from(*tick)).sum();
        let count = u128::try_from(full.len()).unwrap_or(u128::MAX);
        let mean = total.checked_div(count).unwrap_or(0);
        let max = full.iter().copied().max().unwrap_or(0);
        Self {
            interval_ms,
            ticks: u64::try_from(full.len()).unwrap_or(u64::MAX),
            mean_per_sec_x100: per_sec_x100(mean),
            max_per_sec_x100: per_sec_x100(u128::from(max)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub success: bool,
    pub interrupted: bool,
    pub elapsed_ms: u64,
    pub passed: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub tests: Vec<BatchTestReport>,
}

impl BatchReport {
    /// # Errors
    ///
    /// Returns an error when a latency histogram cannot be encoded.
    pub fn from_outcome(outcome: &BatchOutcome) -> Result<Self, MetricsError> {
        Ok(Self {
            success: outcome.is_success(),
            interrupted: outcome.interrupted,
            elapsed_ms: millis(outcome.elapsed),
            passed: outcome.passed(),
            failed: outcome.failed(),
            success_rate: from_x100(outcome.success_rate_x100()),
            tests: outcome
                .results
                .iter()
                .map(BatchTestReport::from_result)
                .collect::<Result<Vec<_>, _>>()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchTestReport {
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<RunReport>,
}

impl BatchTestReport {
    fn from_result(test: &BatchTestResult) -> Result<Self, MetricsError> {
        Ok(Self {
            name: test.name.clone(),
            success: test.is_success(),
            error: test.error.clone(),
            result: test.result.as_ref().map(RunReport::from_result).transpose()?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareReport {
    pub success: bool,
    pub interrupted: bool,
    pub pairing: String,
    pub elapsed_ms: u64,
    pub pairs: usize,
    pub passed: usize,
    pub failed: usize,
    pub comparisons: Vec<ComparisonResult>,
    pub unpaired: Vec<UnpairedEntry>,
    pub entries: Vec<CompareEntryReport>,
}

impl CompareReport {
    #[must_use]
    pub fn from_outcome(outcome: &CompareOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            interrupted: outcome.interrupted,
            pairing: outcome.strategy.to_string(),
            elapsed_ms: millis(outcome.elapsed),
            pairs: outcome.pairing.pairs.len(),
            passed: outcome.passed(),
            failed: outcome.failed(),
            comparisons: outcome.comparisons.clone(),
            unpaired: outcome.pairing.unpaired.clone(),
            entries: outcome
                .base_entries
                .iter()
                .chain(&outcome.target_entries)
                .map(CompareEntryReport::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareEntryReport {
    pub side: Side,
    pub name: String,
    pub index: usize,
    pub fields: BTreeMap<String, String>,
    pub requests: u64,
    pub success_rate: f64,
    pub status: Option<u16>,
    pub latency_us: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_error: Option<String>,
}

impl From<&CompareEntry> for CompareEntryReport {
    fn from(entry: &CompareEntry) -> Self {
        let response = entry.result.response.as_ref();
        Self {
            side: entry.side,
            name: entry.name.clone(),
            index: entry.index,
            fields: entry.fields.clone(),
            requests: entry.result.overall.requests,
            success_rate: from_x100(entry.result.overall.success_rate_x100()),
            status: response.and_then(|captured| captured.status),
            latency_us: response.map(|captured| micros(captured.latency)),
            transport_error: response.and_then(|captured| captured.transport_error.clone()),
        }
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

fn from_x100(value: u64) -> f64 {
    value as f64 / 100.0
}
