use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::error::MetricsError;

use super::histogram::LatencyHistogram;
use super::types::{CapturedResponse, DispatchOutcome, StatsSnapshot};

/// Concurrently updated counters for one endpoint (or the whole run).
///
/// Counters are atomics; the histogram and the grouped maps sit behind their
/// own short-lived mutexes.
#[derive(Debug)]
pub struct EndpointStats {
    label: String,
    requests: AtomicU64,
    successes: AtomicU64,
    transport_failures: AtomicU64,
    assertion_failures: AtomicU64,
    read_bytes: AtomicU64,
    write_bytes: AtomicU64,
    histogram: Mutex<LatencyHistogram>,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    transport_errors: Mutex<BTreeMap<String, u64>>,
    assertion_errors: Mutex<BTreeMap<String, u64>>,
}

/// Cheap counter-only view used by the sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub requests: u64,
    pub successes: u64,
    pub transport_failures: u64,
    pub assertion_failures: u64,
    pub read_bytes: u64,
    pub write_bytes: u64,
}

impl EndpointStats {
    /// # Errors
    ///
    /// Returns an error if the histogram cannot be created.
    pub fn new(label: impl Into<String>) -> Result<Self, MetricsError> {
        Ok(Self {
            label: label.into(),
            requests: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            assertion_failures: AtomicU64::new(0),
            read_bytes: AtomicU64::new(0),
            write_bytes: AtomicU64::new(0),
            histogram: Mutex::new(LatencyHistogram::new()?),
            status_counts: Mutex::new(BTreeMap::new()),
            transport_errors: Mutex::new(BTreeMap::new()),
            assertion_errors: Mutex::new(BTreeMap::new()),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fold one outcome into the counters.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned or the latency cannot be recorded.
    pub fn record(&self, outcome: &DispatchOutcome) -> Result<(), MetricsError> {
        self.read_bytes.fetch_add(outcome.read_bytes, Ordering::Relaxed);
        self.write_bytes.fetch_add(outcome.write_bytes, Ordering::Relaxed);

        lock(&self.histogram, "histogram")?.record(outcome.latency)?;

        if let Some(status) = outcome.status {
            bump(&mut *lock(&self.status_counts, "status counts")?, status);
        }

        if let Some(error) = outcome.transport_error.as_ref() {
            self.transport_failures.fetch_add(1, Ordering::Relaxed);
            bump(&mut *lock(&self.transport_errors, "transport errors")?, error.clone());
        } else if !outcome.assertion_failures.is_empty() {
            self.assertion_failures.fetch_add(1, Ordering::Relaxed);
            let mut grouped = lock(&self.assertion_errors, "assertion errors")?;
            for failure in &outcome.assertion_failures {
                bump(&mut grouped, failure.to_string());
            }
        } else {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }

        // Counted last so a sample never sees more requests than outcomes.
        self.requests.fetch_add(1, Ordering::Release);
        Ok(())
    }

    #[must_use]
    pub fn counters(&self) -> Counters {
        Counters {
            requests: self.requests.load(Ordering::Acquire),
            successes: self.successes.load(Ordering::Relaxed),
            transport_failures: self.transport_failures.load(Ordering::Relaxed),
            assertion_failures: self.assertion_failures.load(Ordering::Relaxed),
            read_bytes: self.read_bytes.load(Ordering::Relaxed),
            write_bytes: self.write_bytes.load(Ordering::Relaxed),
        }
    }

    /// Copy of the current histogram.
    ///
    /// # Errors
    ///
    /// Returns an error if the histogram lock is poisoned.
    pub fn histogram(&self) -> Result<LatencyHistogram, MetricsError> {
        Ok(lock(&self.histogram, "histogram")?.clone())
    }

    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn snapshot(&self) -> Result<StatsSnapshot, MetricsError> {
        let counters = self.counters();
        let histogram = self.histogram()?;
        Ok(StatsSnapshot {
            label: self.label.clone(),
            requests: counters.requests,
            successes: counters.successes,
            transport_failures: counters.transport_failures,
            assertion_failures: counters.assertion_failures,
            read_bytes: counters.read_bytes,
            write_bytes: counters.write_bytes,
            status_counts: lock(&self.status_counts, "status counts")?.clone(),
            transport_errors: lock(&self.transport_errors, "transport errors")?.clone(),
            assertion_errors: lock(&self.assertion_errors, "assertion errors")?.clone(),
            latency: histogram.summary(),
            histogram,
        })
    }
}

/// Stats for a whole run: the overall aggregate plus one per template.
#[derive(Debug)]
pub struct RunStats {
    overall: EndpointStats,
    endpoints: Vec<EndpointStats>,
    captured: OnceLock<CapturedResponse>,
}

impl RunStats {
    /// # Errors
    ///
    /// Returns an error if a histogram cannot be created.
    pub fn new<I, S>(overall_label: &str, endpoint_labels: I) -> Result<Self, MetricsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints = endpoint_labels
            .into_iter()
            .map(EndpointStats::new)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            overall: EndpointStats::new(overall_label)?,
            endpoints,
            captured: OnceLock::new(),
        })
    }

    /// # Errors
    ///
    /// Returns an error if a lock is poisoned or the latency cannot be recorded.
    pub fn record(&self, outcome: &DispatchOutcome) -> Result<(), MetricsError> {
        if let Some(endpoint) = self.endpoints.get(outcome.template_index) {
            endpoint.record(outcome)?;
        }
        self.overall.record(outcome)
    }

    #[must_use]
    pub const fn overall(&self) -> &EndpointStats {
        &self.overall
    }

    #[must_use]
    pub fn endpoints(&self) -> &[EndpointStats] {
        &self.endpoints
    }

    /// Keep `response` if none has been captured yet.
    pub fn capture(&self, response: CapturedResponse) {
        drop(self.captured.set(response));
    }

    #[must_use]
    pub fn has_capture(&self) -> bool {
        self.captured.get().is_some()
    }

    #[must_use]
    pub fn captured(&self) -> Option<CapturedResponse> {
        self.captured.get().cloned()
    }
}

fn lock<'stats, T>(
    mutex: &'stats Mutex<T>,
    context: &'static str,
) -> Result<MutexGuard<'stats, T>, MetricsError> {
    mutex
        .lock()
        .map_err(|_err| MetricsError::LockPoisoned { context })
}

fn bump<K: Ord>(map: &mut BTreeMap<K, u64>, key: K) {
    let count = map.entry(key).or_insert(0);
    *count = count.saturating_add(1);
}
