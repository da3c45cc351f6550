use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;

use crate::assertions::AssertionFailure;

use super::histogram::{LatencyHistogram, LatencySummary};

/// The result of one dispatch, folded into the stats and then dropped.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub template_index: usize,
    pub latency: Duration,
    pub status: Option<u16>,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub transport_error: Option<String>,
    pub assertion_failures: Vec<AssertionFailure>,
}

impl DispatchOutcome {
    /// No transport error and no failed assertion.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.transport_error.is_none() && self.assertion_failures.is_empty()
    }
}

/// First response seen by a run, kept for compare rules.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: Option<u16>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub latency: Duration,
    pub transport_error: Option<String>,
    pub assertion_failures: Vec<AssertionFailure>,
}

/// Frozen copy of one endpoint's counters.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub label: String,
    pub requests: u64,
    pub successes: u64,
    pub transport_failures: u64,
    pub assertion_failures: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub status_counts: BTreeMap<u16, u64>,
    pub transport_errors: BTreeMap<String, u64>,
    pub assertion_errors: BTreeMap<String, u64>,
    pub latency: LatencySummary,
    pub histogram: LatencyHistogram,
}

impl StatsSnapshot {
    /// Success rate in hundredths of a percent (10000 = 100%).
    #[must_use]
    pub fn success_rate_x100(&self) -> u64 {
        rate_x100(self.successes, self.requests)
    }

    /// Requests per second over `elapsed`, in hundredths.
    #[must_use]
    pub fn rps_x100(&self, elapsed: Duration) -> u64 {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.requests
            .saturating_mul(100_000)
            .checked_div(millis)
            .unwrap_or(0)
    }

    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.transport_failures == 0 && self.assertion_failures == 0
    }
}

/// `part / total` in hundredths of a percent.
#[must_use]
pub fn rate_x100(part: u64, total: u64) -> u64 {
    part.saturating_mul(10_000).checked_div(total).unwrap_or(0)
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub overall: StatsSnapshot,
    pub endpoints: Vec<StatsSnapshot>,
    /// Wall-clock time the run actually took.
    pub elapsed: Duration,
    pub total_issued: u64,
    pub interrupted: bool,
    /// Requests completed in each sampler tick.
    pub tick_counts: Vec<u64>,
    pub sample_interval: Duration,
    pub response: Option<CapturedResponse>,
}

impl RunResult {
    /// Overall success: no transport error and no assertion failure.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.overall.is_clean()
    }
}

/// Live view of a run published by the sampler.
#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
    pub requests: u64,
    pub successes: u64,
    pub transport_failures: u64,
    pub assertion_failures: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
    /// Requests completed since the previous sample.
    pub tick_requests: u64,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
}

impl Sample {
    /// Baseline published before the first request.
    #[must_use]
    pub fn zero() -> Self {
        Self {
            timestamp: Utc::now(),
            elapsed: Duration::ZERO,
            requests: 0,
            successes: 0,
            transport_failures: 0,
            assertion_failures: 0,
            read_bytes: 0,
            write_bytes: 0,
            tick_requests: 0,
            p50: Duration::ZERO,
            p90: Duration::ZERO,
            p99: Duration::ZERO,
        }
    }
}
