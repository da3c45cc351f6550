use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{AppError, AppResult};
use crate::http::{Dispatcher, RequestBuilder, RequestTemplate, RunPlan, TemplatePool, Transport};
use crate::metrics::{RunResult, rate_x100};
use crate::shutdown::ShutdownSignal;

/// One named test of a batch document.
#[derive(Debug, Clone)]
pub struct BatchTest {
    pub name: String,
    pub template: RequestTemplate,
    pub plan: RunPlan,
}

#[derive(Debug, Clone)]
pub struct BatchSuite {
    pub tests: Vec<BatchTest>,
    pub vars: BTreeMap<String, String>,
}

impl BatchSuite {
    /// Build every test's request once without sending anything.
    ///
    /// # Errors
    ///
    /// Returns the first URL, header, or variable error of any test.
    pub fn validate(&self) -> AppResult<()> {
        self.prepare().map(drop)
    }

    fn prepare(&self) -> AppResult<Vec<PreparedTest>> {
        self.tests
            .iter()
            .map(|test| {
                let pool = TemplatePool::single(test.template.clone())?;
                let builder = RequestBuilder::new(&pool, None, &self.vars).inspect_err(|err| {
                    tracing::error!("Batch test '{}' is invalid: {}", test.name, err);
                })?;
                Ok(PreparedTest {
                    name: test.name.clone(),
                    plan: test.plan.clone(),
                    pool: Arc::new(pool),
                    builder,
                })
            })
            .collect()
    }
}

struct PreparedTest {
    name: String,
    plan: RunPlan,
    pool: Arc<TemplatePool>,
    builder: RequestBuilder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchExecution {
    Sequential,
    /// At most this many tests run at the same time.
    Concurrent(usize),
}


#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub suite: BatchSuite,
    pub execution: BatchExecution,
}

#[derive(Debug, Clone)]
pub struct BatchTestResult {
    pub name: String,
    pub result: Option<RunResult>,
    /// Set when the test could not run at all.
    pub error: Option<String>,
}

impl BatchTestResult {
    /// No top-level error and no per-request failure.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.as_ref().is_some_and(RunResult::is_success)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<BatchTestResult>,
    pub elapsed: Duration,
    pub interrupted: bool,
}

impl BatchOutcome {
    #[must_use]
    pub fn passed(&self) -> usize {
        self.results
            .iter()
            .filter(|result| result.is_success())
            .count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len().saturating_sub(self.passed())
    }

    /// Percentage of successful tests, times 100.
    #[must_use]
    pub fn success_rate_x100(&self) -> u64 {
        rate_x100(
            u64::try_from(self.passed()).unwrap_or(u64::MAX),
            u64::try_from(self.results.len()).unwrap_or(u64::MAX),
        )
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.failed() == 0
    }
}

/// Run every test of the suite, bounded by `execution`. Every test is built
/// before any is dispatched, so one malformed test fails the whole batch up
/// front. Once running, a failing test never stops the others; tests not yet
/// started when `shutdown` fires are reported as cancelled.
///
/// # Errors
///
/// Returns a configuration error when any test's request cannot be built, or
/// an error when a test task panics.
pub async fn run_batch(
    request: &BatchRequest,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
) -> AppResult<BatchOutcome> {
    let prepared = request.suite.prepare()?;
    let started = Instant::now();

    let results = match request.execution {
        BatchExecution::Sequential => {
            tracing::info!("Starting batch: {} test(s), one at a time", prepared.len());
            let mut results = Vec::with_capacity(prepared.len());
            for test in prepared {
                if shutdown.is_triggered() {
                    results.push(cancelled(test.name));
                    continue;
                }
                results.push(run_test(test, transport, shutdown).await);
            }
            results
        }
        BatchExecution::Concurrent(limit) => {
            let limit = limit.max(1);
            tracing::info!(
                "Starting batch: {} test(s), {} at a time",
                prepared.len(),
                limit
            );
            run_concurrent(prepared, limit, transport, shutdown).await?
        }
    };

    let outcome = BatchOutcome {
        results,
        elapsed: started.elapsed(),
        interrupted: shutdown.is_triggered(),
    };
    tracing::info!(
        "Batch finished in {:?}: {} passed, {} failed",
        outcome.elapsed,
        outcome.passed(),
        outcome.failed()
    );
    Ok(outcome)
}

async fn run_concurrent(
    prepared: Vec<PreparedTest>,
    limit: usize,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
) -> AppResult<Vec<BatchTestResult>> {
    let permits = Arc::new(Semaphore::new(limit));
    let handles: Vec<JoinHandle<BatchTestResult>> = prepared
        .into_iter()
        .map(|test| {
            let permits = Arc::clone(&permits);
            let transport = Arc::clone(transport);
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return cancelled(test.name);
                };
                if shutdown.is_triggered() {
                    return cancelled(test.name);
                }
                run_test(test, &transport, &shutdown).await
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for handle in handles {
        results.push(handle.await.map_err(AppError::from)?);
    }
    Ok(results)
}

fn cancelled(name: String) -> BatchTestResult {
    BatchTestResult {
        name,
        result: None,
        error: Some("cancelled before start".to_owned()),
    }
}

async fn run_test(
    test: PreparedTest,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
) -> BatchTestResult {
    tracing::info!("Batch test '{}' starting", test.name);
    let PreparedTest {
        name,
        plan,
        pool,
        builder,
    } = test;
    let result = match Dispatcher::new(plan, pool, builder, Arc::clone(transport)) {
        Ok(dispatcher) => dispatcher.run(shutdown).await,
        Err(err) => Err(err),
    };
    match result {
        Ok(result) => {
            tracing::info!(
                "Batch test '{}' done: {} request(s), {} ok",
                name,
                result.overall.requests,
                result.overall.successes
            );
            BatchTestResult {
                name,
                result: Some(result),
                error: None,
            }
        }
        Err(err) => {
            tracing::error!("Batch test '{}' failed: {}", name, err);
            BatchTestResult {
                name,
                result: None,
                error: Some(err.to_string()),
            }
        }
    }
}
