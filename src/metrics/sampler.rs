use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::MetricsError;
use crate::shutdown::ShutdownSignal;

use super::stats::RunStats;
use super::types::Sample;

/// Create the sample channel, already holding the zero baseline.
#[must_use]
pub fn sample_channel() -> (watch::Sender<Sample>, watch::Receiver<Sample>) {
    watch::channel(Sample::zero())
}

/// Publish a sample every `interval` until `stop` fires, then publish one
/// last sample. Resolves to the number of requests completed in each tick.
pub fn spawn_sampler(
    stats: Arc<RunStats>,
    tx: watch::Sender<Sample>,
    interval: Duration,
    started: Instant,
    stop: ShutdownSignal,
) -> JoinHandle<Result<Vec<u64>, MetricsError>> {
    tokio::spawn(async move {
        let first_tick = started.checked_add(interval).unwrap_or(started);
        let mut ticker = tokio::time::interval_at(first_tick, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tick_counts = Vec::new();
        let mut last_requests = 0_u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let sample = take_sample(&stats, started, last_requests)?;
                    last_requests = sample.requests;
                    tick_counts.push(sample.tick_requests);
                    tracing::debug!(
                        "sample: {} requests ({} this tick), p50 {:?}",
                        sample.requests,
                        sample.tick_requests,
                        sample.p50
                    );
                    tx.send_replace(sample);
                }
                () = stop.triggered() => {
                    let sample = take_sample(&stats, started, last_requests)?;
                    if sample.tick_requests > 0 {
                        tick_counts.push(sample.tick_requests);
                    }
                    tx.send_replace(sample);
                    break;
                }
            }
        }

        Ok(tick_counts)
    })
}

fn take_sample(
    stats: &RunStats,
    started: Instant,
    last_requests: u64,
) -> Result<Sample, MetricsError> {
    let overall = stats.overall();
    let counters = overall.counters();
    let histogram = overall.histogram()?;
    Ok(Sample {
        timestamp: Utc::now(),
        elapsed: started.elapsed(),
        requests: counters.requests,
        successes: counters.successes,
        transport_failures: counters.transport_failures,
        assertion_failures: counters.assertion_failures,
        read_bytes: counters.read_bytes,
        write_bytes: counters.write_bytes,
        tick_requests: counters.requests.saturating_sub(last_requests),
        p50: histogram.value_at(0.50),
        p90: histogram.value_at(0.90),
        p99: histogram.value_at(0.99),
    })
}
