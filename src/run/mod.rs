//! Run drivers: one re-entrant entry point for every mode plus the
//! scheduled-repetition loop.
mod batch;
mod benchmark;
mod schedule;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use crate::compare::{CompareOutcome, CompareSuite, run_compare};
use crate::error::AppResult;
use crate::http::Transport;
use crate::metrics::RunResult;
use crate::shutdown::ShutdownSignal;

pub use batch::{
    BatchExecution, BatchOutcome, BatchRequest, BatchSuite, BatchTest, BatchTestResult, run_batch,
};
pub use benchmark::BenchmarkRequest;
pub use schedule::{IntervalSchedule, Schedule, ScheduleSummary, run_scheduled};

#[derive(Debug, Clone)]
pub enum RunRequest {
    Benchmark(BenchmarkRequest),
    Batch(BatchRequest),
    Compare(CompareSuite),
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Benchmark(Box<RunResult>),
    Batch(BatchOutcome),
    Compare(CompareOutcome),
}

impl RunOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::Benchmark(result) => result.is_success(),
            RunOutcome::Batch(outcome) => outcome.is_success(),
            RunOutcome::Compare(outcome) => outcome.is_success(),
        }
    }

    #[must_use]
    pub fn interrupted(&self) -> bool {
        match self {
            RunOutcome::Benchmark(result) => result.interrupted,
            RunOutcome::Batch(outcome) => outcome.interrupted,
            RunOutcome::Compare(outcome) => outcome.interrupted,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self {
            RunOutcome::Benchmark(result) => result.elapsed,
            RunOutcome::Batch(outcome) => outcome.elapsed,
            RunOutcome::Compare(outcome) => outcome.elapsed,
        }
    }
}

/// Execute one run of any mode. Every call allocates fresh stats, limiter,
/// and stop signal, so it can be invoked repeatedly or concurrently.
///
/// # Errors
///
/// Returns configuration errors before any request is sent, and dispatcher
/// errors raised while recording results.
pub async fn run_once(
    request: &RunRequest,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
) -> AppResult<RunOutcome> {
    match request {
        RunRequest::Benchmark(benchmark) => {
            let result = benchmark::run_benchmark(benchmark, transport, shutdown).await?;
            Ok(RunOutcome::Benchmark(Box::new(result)))
        }
        RunRequest::Batch(batch) => Ok(RunOutcome::Batch(
            run_batch(batch, transport, shutdown).await?,
        )),
        RunRequest::Compare(suite) => Ok(RunOutcome::Compare(
            run_compare(suite, transport, shutdown).await?,
        )),
    }
}
