use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppResult;
use crate::http::Transport;
use crate::shutdown::ShutdownSignal;

use super::{RunOutcome, RunRequest, run_once};

/// Supplies start times for repeated runs. Calendar logic lives in
/// implementations; the driver only sleeps until the returned instant.
pub trait Schedule: Send + Sync {
    /// Start time of the run following one that started at `previous`.
    /// `None` ends the schedule.
    fn next_after(&self, previous: Instant) -> Option<Instant>;
}

/// Fixed spacing between run starts.
#[derive(Debug, Clone, Copy)]
pub struct IntervalSchedule {
    interval: Duration,
}

impl IntervalSchedule {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Schedule for IntervalSchedule {
    fn next_after(&self, previous: Instant) -> Option<Instant> {
        previous.checked_add(self.interval)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub runs: u64,
    pub failed_runs: u64,
    pub errored_runs: u64,
}

/// Invoke [`run_once`] at the times `schedule` supplies until `max_runs` is
/// reached, the schedule ends, or `shutdown` fires. Every finished run,
/// including one cut short by cancellation, is handed to `on_outcome`.
/// Runtime failures of one run are logged and the schedule continues.
///
/// # Errors
///
/// Returns configuration errors from the first run that raises one, and any
/// error from `on_outcome`.
pub async fn run_scheduled<S, F>(
    request: &RunRequest,
    schedule: &S,
    max_runs: Option<u64>,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
    mut on_outcome: F,
) -> AppResult<ScheduleSummary>
where
    S: Schedule + ?Sized,
    F: FnMut(u64, &RunOutcome) -> AppResult<()>,
{
    let mut summary = ScheduleSummary::default();
    let mut next_start = Instant::now();

    loop {
        if shutdown.is_triggered() {
            break;
        }
        if max_runs.is_some_and(|max| summary.runs >= max) {
            tracing::info!("Reached {} scheduled run(s)", summary.runs);
            break;
        }

        if next_start > Instant::now() {
            tracing::info!(
                "Next run in {:?}",
                next_start.saturating_duration_since(Instant::now())
            );
            tokio::select! {
                () = tokio::time::sleep_until(next_start) => {}
                () = shutdown.triggered() => break,
            }
        }

        let started = Instant::now();
        summary.runs = summary.runs.saturating_add(1);
        tracing::info!("Scheduled run {} starting", summary.runs);
        match run_once(request, transport, shutdown).await {
            Ok(outcome) => {
                if !outcome.is_success() {
                    summary.failed_runs = summary.failed_runs.saturating_add(1);
                }
                on_outcome(summary.runs, &outcome)?;
            }
            Err(err) if err.is_config() => return Err(err),
            Err(err) => {
                summary.errored_runs = summary.errored_runs.saturating_add(1);
                tracing::error!("Scheduled run {} failed: {}", summary.runs, err);
            }
        }

        let Some(next) = schedule.next_after(started) else {
            tracing::info!("Schedule has no further runs");
            break;
        };
        if next < Instant::now() && !shutdown.is_triggered() {
            tracing::warn!("Run {} overran its slot; starting the next one now", summary.runs);
        }
        next_start = next;
    }

    Ok(summary)
}
