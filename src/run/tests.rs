use super::*;
use crate::http::{LoadStrategy, RequestTemplate, RunPlan, TransportError, TransportResponse};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

/// Answers by path: `/fail` is a transport error, `/teapot` a 418,
/// anything else a 200.
#[derive(Default)]
struct PathTransport {
    calls: AtomicU64,
    paths: Mutex<Vec<String>>,
}

#[async_trait]
impl Transport for PathTransport {
    async fn send(
        &self,
        request: reqwest::Request,
        _capture_body: bool,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut paths) = self.paths.lock() {
            paths.push(request.url().path().to_owned());
        }
        tokio::task::yield_now().await;
        let status = match request.url().path() {
            "/fail" => {
                return Err(TransportError {
                    message: "connection refused".to_owned(),
                    timed_out: false,
                });
            }
            "/teapot" => 418,
            _ => 200,
        };
        Ok(TransportResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            body_len: 2,
        })
    }
}

fn transport() -> (Arc<PathTransport>, Arc<dyn Transport>) {
    let fake = Arc::new(PathTransport::default());
    let shared: Arc<dyn Transport> = fake.clone();
    (fake, shared)
}

fn capped_plan(concurrency: usize, requests: u64) -> RunPlan {
    RunPlan {
        concurrency,
        sample_interval: Duration::from_millis(20),
        ..RunPlan::default()
    }
    .with_stop(None, Some(requests))
}

fn benchmark(url: &str, requests: u64) -> Result<RunRequest, String> {
    let template = RequestTemplate::new("GET", url).map_err(|err| err.to_string())?;
    Ok(RunRequest::Benchmark(BenchmarkRequest {
        templates: vec![template],
        strategy: LoadStrategy::RoundRobin,
        base_url: None,
        vars: BTreeMap::new(),
        plan: capped_plan(4, requests),
    }))
}

fn batch_test(name: &str, url: &str, requests: u64) -> Result<BatchTest, String> {
    Ok(BatchTest {
        name: name.to_owned(),
        template: RequestTemplate::new("GET", url)
            .map_err(|err| err.to_string())?
            .with_name(name),
        plan: capped_plan(2, requests),
    })
}

fn expect_benchmark(outcome: &RunOutcome) -> Result<&RunResult, String> {
    match outcome {
        RunOutcome::Benchmark(result) => Ok(result.as_ref()),
        RunOutcome::Batch(_) | RunOutcome::Compare(_) => {
            Err("Expected a benchmark outcome".to_owned())
        }
    }
}

fn expect_batch(outcome: RunOutcome) -> Result<BatchOutcome, String> {
    match outcome {
        RunOutcome::Batch(batch) => Ok(batch),
        RunOutcome::Benchmark(_) | RunOutcome::Compare(_) => {
            Err("Expected a batch outcome".to_owned())
        }
    }
}

#[test]
fn run_once_benchmark_honors_cap() -> Result<(), String> {
    run_async_test(async {
        let (fake, transport) = transport();
        let request = benchmark("http://svc.test/ok", 25)?;
        let outcome = run_once(&request, &transport, &ShutdownSignal::new())
            .await
            .map_err(|err| err.to_string())?;
        let result = expect_benchmark(&outcome)?;
        if result.total_issued != 25 || result.overall.requests != 25 {
            return Err(format!(
                "Expected 25 requests, issued {} recorded {}",
                result.total_issued, result.overall.requests
            ));
        }
        if fake.calls.load(Ordering::SeqCst) != 25 {
            return Err("Transport should see exactly 25 calls".to_owned());
        }
        if !outcome.is_success() || outcome.interrupted() {
            return Err("Clean capped run should succeed".to_owned());
        }
        Ok(())
    })
}

#[test]
fn run_once_is_reentrant() -> Result<(), String> {
    run_async_test(async {
        let (_fake, transport) = transport();
        let request = benchmark("http://svc.test/ok", 7)?;
        let shutdown = ShutdownSignal::new();
        for _ in 0..2 {
            let outcome = run_once(&request, &transport, &shutdown)
                .await
                .map_err(|err| err.to_string())?;
            let result = expect_benchmark(&outcome)?;
            if result.overall.requests != 7 {
                return Err(format!(
                    "Each run should count only its own requests, got {}",
                    result.overall.requests
                ));
            }
        }
        Ok(())
    })
}

#[test]
fn batch_reports_each_test_and_success_rate() -> Result<(), String> {
    run_async_test(async {
        let (_fake, transport) = transport();
        let request = RunRequest::Batch(BatchRequest {
            suite: BatchSuite {
                tests: vec![
                    batch_test("healthy", "http://svc.test/ok", 4)?,
                    batch_test("broken", "http://svc.test/fail", 4)?,
                ],
                vars: BTreeMap::new(),
            },
            execution: BatchExecution::Sequential,
        });
        let outcome = run_once(&request, &transport, &ShutdownSignal::new())
            .await
            .map_err(|err| err.to_string())?;
        let batch = expect_batch(outcome)?;
        let names: Vec<&str> = batch.results.iter().map(|result| result.name.as_str()).collect();
        if names != ["healthy", "broken"] {
            return Err(format!("Results should keep test order: {:?}", names));
        }
        if batch.passed() != 1 || batch.failed() != 1 {
            return Err(format!(
                "Expected 1 passed and 1 failed, got {} / {}",
                batch.passed(),
                batch.failed()
            ));
        }
        if batch.success_rate_x100() != 5000 {
            return Err(format!(
                "Expected 50.00% success, got {}",
                batch.success_rate_x100()
            ));
        }
        let broken = batch
            .results
            .get(1)
            .and_then(|result| result.result.as_ref())
            .ok_or("Broken test should still have a run result")?;
        if broken.overall.transport_failures != 4 {
            return Err("Transport errors should be recorded, not fatal".to_owned());
        }
        if batch.is_success() {
            return Err("Batch with a failed test is not successful".to_owned());
        }
        Ok(())
    })
}

#[test]
fn batch_with_malformed_test_dispatches_nothing() -> Result<(), String> {
    run_async_test(async {
        let (fake, transport) = transport();
        for url in ["/no-base", "http://[::1"] {
            let request = BatchRequest {
                suite: BatchSuite {
                    tests: vec![
                        batch_test("status", "http://svc.test/teapot", 3)?,
                        batch_test("malformed", url, 2)?,
                    ],
                    vars: BTreeMap::new(),
                },
                execution: BatchExecution::Concurrent(2),
            };
            if request.suite.validate().is_ok() {
                return Err(format!("Validation should reject '{}'", url));
            }
            match run_batch(&request, &transport, &ShutdownSignal::new()).await {
                Err(err) if err.is_config() => {}
                Err(err) => return Err(format!("Expected a config error, got {}", err)),
                Ok(_) => return Err(format!("Batch with '{}' should fail up front", url)),
            }
        }
        if fake.calls.load(Ordering::SeqCst) != 0 {
            return Err("No sibling should dispatch before the batch is valid".to_owned());
        }
        Ok(())
    })
}

#[test]
fn sequential_batch_finishes_each_test_before_the_next() -> Result<(), String> {
    run_async_test(async {
        let (fake, transport) = transport();
        let request = BatchRequest {
            suite: BatchSuite {
                tests: vec![
                    batch_test("first", "http://svc.test/first", 4)?,
                    batch_test("second", "http://svc.test/second", 4)?,
                    batch_test("third", "http://svc.test/third", 4)?,
                ],
                vars: BTreeMap::new(),
            },
            execution: BatchExecution::Sequential,
        };
        let batch = run_batch(&request, &transport, &ShutdownSignal::new())
            .await
            .map_err(|err| err.to_string())?;
        if batch.passed() != 3 {
            return Err(format!("Expected 3 passed, got {}", batch.passed()));
        }
        let paths = fake
            .paths
            .lock()
            .map_err(|_err| "Path log poisoned".to_owned())?
            .clone();
        let expected: Vec<String> = ["/first", "/second", "/third"]
            .iter()
            .flat_map(|path| std::iter::repeat_n((*path).to_owned(), 4))
            .collect();
        if paths != expected {
            return Err(format!("Tests overlapped: {:?}", paths));
        }
        Ok(())
    })
}

#[test]
fn rate_limited_run_spreads_requests() -> Result<(), String> {
    run_async_test(async {
        let (fake, transport) = transport();
        let template =
            RequestTemplate::new("GET", "http://svc.test/ok").map_err(|err| err.to_string())?;
        let mut plan = capped_plan(4, 10);
        plan.rate = Some(50);
        let request = RunRequest::Benchmark(BenchmarkRequest {
            templates: vec![template],
            strategy: LoadStrategy::RoundRobin,
            base_url: None,
            vars: BTreeMap::new(),
            plan,
        });
        let started = tokio::time::Instant::now();
        let outcome = run_once(&request, &transport, &ShutdownSignal::new())
            .await
            .map_err(|err| err.to_string())?;
        let elapsed = started.elapsed();
        let result = expect_benchmark(&outcome)?;
        if result.overall.requests != 10 || fake.calls.load(Ordering::SeqCst) != 10 {
            return Err(format!("Expected 10 requests, got {}", result.overall.requests));
        }
        // 5 permits per 100ms tick: the second half waits for the second tick.
        if elapsed < Duration::from_millis(80) {
            return Err(format!("Rate limit not applied, finished in {:?}", elapsed));
        }
        Ok(())
    })
}

#[test]
fn batch_after_cancellation_starts_nothing() -> Result<(), String> {
    run_async_test(async {
        let (fake, transport) = transport();
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        let request = BatchRequest {
            suite: BatchSuite {
                tests: vec![batch_test("one", "http://svc.test/ok", 2)?],
                vars: BTreeMap::new(),
            },
            execution: BatchExecution::Sequential,
        };
        let batch = run_batch(&request, &transport, &shutdown)
            .await
            .map_err(|err| err.to_string())?;
        if !batch.interrupted || batch.passed() != 0 {
            return Err("Cancelled batch should be interrupted with no passes".to_owned());
        }
        if fake.calls.load(Ordering::SeqCst) != 0 {
            return Err("No request should be sent after cancellation".to_owned());
        }
        Ok(())
    })
}

#[test]
fn interval_schedule_spaces_runs() -> Result<(), String> {
    let schedule = IntervalSchedule::new(Duration::from_secs(5));
    let now = tokio::time::Instant::now();
    let next = schedule.next_after(now).ok_or("Expected a next run")?;
    if next.duration_since(now) != Duration::from_secs(5) {
        return Err("Next run should be one interval later".to_owned());
    }
    Ok(())
}

#[test]
fn scheduled_runs_stop_at_max_runs() -> Result<(), String> {
    run_async_test(async {
        let (_fake, transport) = transport();
        let request = benchmark("http://svc.test/ok", 3)?;
        let mut seen = Vec::new();
        let summary = run_scheduled(
            &request,
            &IntervalSchedule::new(Duration::from_millis(10)),
            Some(3),
            &transport,
            &ShutdownSignal::new(),
            |run, outcome| {
                seen.push((run, outcome.is_success()));
                Ok(())
            },
        )
        .await
        .map_err(|err| err.to_string())?;
        if summary.runs != 3 || summary.failed_runs != 0 {
            return Err(format!("Unexpected summary: {:?}", summary));
        }
        if seen != [(1, true), (2, true), (3, true)] {
            return Err(format!("Unexpected callbacks: {:?}", seen));
        }
        Ok(())
    })
}

#[test]
fn scheduled_runs_stop_on_cancellation() -> Result<(), String> {
    run_async_test(async {
        let (_fake, transport) = transport();
        let request = benchmark("http://svc.test/ok", 2)?;
        let shutdown = ShutdownSignal::new();
        let summary = run_scheduled(
            &request,
            &IntervalSchedule::new(Duration::from_secs(60)),
            None,
            &transport,
            &shutdown,
            |_run, _outcome| {
                shutdown.trigger();
                Ok(())
            },
        )
        .await
        .map_err(|err| err.to_string())?;
        if summary.runs != 1 {
            return Err(format!("Expected one run before stopping, got {}", summary.runs));
        }
        Ok(())
    })
}

#[test]
fn scheduled_runs_abort_on_config_error() -> Result<(), String> {
    run_async_test(async {
        let (fake, transport) = transport();
        let relative = RequestTemplate::new("GET", "/relative").map_err(|err| err.to_string())?;
        let bad_var = RequestTemplate::new("GET", "http://svc.test/{{id}}")
            .map_err(|err| err.to_string())?;
        let requests = [
            (Vec::new(), BTreeMap::new()),
            (vec![relative], BTreeMap::new()),
            (
                vec![bad_var],
                BTreeMap::from([("id".to_owned(), "random:9-1".to_owned())]),
            ),
        ];
        for (templates, vars) in requests {
            let request = RunRequest::Benchmark(BenchmarkRequest {
                templates,
                strategy: LoadStrategy::RoundRobin,
                base_url: None,
                vars,
                plan: capped_plan(1, 1),
            });
            let result = run_scheduled(
                &request,
                &IntervalSchedule::new(Duration::from_millis(10)),
                Some(3),
                &transport,
                &ShutdownSignal::new(),
                |_run, _outcome| Ok(()),
            )
            .await;
            match result {
                Err(err) if err.is_config() => {}
                Err(err) => return Err(format!("Expected a config error, got {}", err)),
                Ok(summary) => return Err(format!("Expected an error, got {:?}", summary)),
            }
        }
        if fake.calls.load(Ordering::SeqCst) != 0 {
            return Err("Config errors must stop before any dispatch".to_owned());
        }
        Ok(())
    })
}
