use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::assertions::{ResponseView, evaluate_all};
use crate::error::{AppError, AppResult, MetricsError};
use crate::metrics::{
    CapturedResponse, DispatchOutcome, RunResult, RunStats, Sample, sample_channel, spawn_sampler,
};
use crate::shutdown::ShutdownSignal;

use super::builder::RequestBuilder;
use super::limiter::RequestLimiter;
use super::rate::RateGate;
use super::template::{RequestTemplate, TemplatePool};
use super::transport::Transport;

/// Run parameters shared by every mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub concurrency: usize,
    /// Stop after this long. `None` runs until the cap or cancellation.
    pub duration: Option<Duration>,
    /// Total request cap; 0 means unlimited.
    pub max_requests: u64,
    pub sample_interval: Duration,
    pub timeout: Duration,
    /// Keep the first response (headers and body) for compare rules.
    pub capture_response: bool,
    /// Requests per second across all workers. `None` is unthrottled.
    pub rate: Option<u64>,
}

/// Run length when neither a duration nor a request cap is configured.
pub const DEFAULT_RUN_DURATION: Duration = Duration::from_secs(10);

impl RunPlan {
    /// Apply a duration and request cap. With neither set the run lasts
    /// [`DEFAULT_RUN_DURATION`]; a cap alone runs until the cap is reached.
    #[must_use]
    pub fn with_stop(mut self, duration: Option<Duration>, requests: Option<u64>) -> Self {
        self.max_requests = requests.unwrap_or(0);
        self.duration = match (duration, requests) {
            (None, None) => Some(DEFAULT_RUN_DURATION),
            (duration, _) => duration,
        };
        self
    }
}

impl Default for RunPlan {
    fn default() -> Self {
        Self {
            concurrency: 1,
            duration: Some(DEFAULT_RUN_DURATION),
            max_requests: 0,
            sample_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(30),
            capture_response: false,
            rate: None,
        }
    }
}

/// A prepared run: templates validated, stats and sample feed allocated.
pub struct Dispatcher {
    plan: RunPlan,
    pool: Arc<TemplatePool>,
    builder: Arc<RequestBuilder>,
    transport: Arc<dyn Transport>,
    stats: Arc<RunStats>,
    sample_tx: watch::Sender<Sample>,
    sample_rx: watch::Receiver<Sample>,
}

struct Worker {
    pool: Arc<TemplatePool>,
    builder: Arc<RequestBuilder>,
    transport: Arc<dyn Transport>,
    stats: Arc<RunStats>,
    limiter: Arc<RequestLimiter>,
    rate: Option<Arc<RateGate>>,
    stop: ShutdownSignal,
    timeout: Duration,
    capture_response: bool,
}

impl Dispatcher {
    /// # Errors
    ///
    /// Returns an error when the stats cannot be allocated.
    pub fn new(
        plan: RunPlan,
        pool: Arc<TemplatePool>,
        builder: RequestBuilder,
        transport: Arc<dyn Transport>,
    ) -> AppResult<Self> {
        let labels: Vec<String> = pool
            .templates()
            .iter()
            .map(|template| template.name().to_owned())
            .collect();
        let stats = RunStats::new("all", labels).map_err(AppError::metrics)?;
        let (sample_tx, sample_rx) = sample_channel();
        Ok(Self {
            plan,
            pool,
            builder: Arc::new(builder),
            transport,
            stats: Arc::new(stats),
            sample_tx,
            sample_rx,
        })
    }

    /// Live sample feed. The first value is the zero baseline.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Sample> {
        self.sample_rx.clone()
    }

    /// Drive the workers until the duration elapses, the cap is reached, or
    /// `shutdown` fires. In-flight requests always finish and are recorded.
    ///
    /// # Errors
    ///
    /// Returns an error when a worker or the sampler fails to record stats.
    pub async fn run(self, shutdown: &ShutdownSignal) -> AppResult<RunResult> {
        let Dispatcher {
            plan,
            pool,
            builder,
            transport,
            stats,
            sample_tx,
            sample_rx,
        } = self;
        drop(sample_rx);

        let stop = ShutdownSignal::new();
        let forward = shutdown.forward_to(&stop);
        if shutdown.is_triggered() {
            stop.trigger();
        }

        let started = Instant::now();
        let sampler = spawn_sampler(
            Arc::clone(&stats),
            sample_tx,
            plan.sample_interval,
            started,
            stop.clone(),
        );
        let timer = plan.duration.map(|duration| spawn_timer(duration, &stop));

        let limiter = Arc::new(RequestLimiter::new(plan.max_requests));
        let (rate, rate_controller) = match plan.rate.filter(|rate| *rate > 0) {
            Some(rate) => {
                let (gate, controller) = RateGate::spawn(rate, &stop);
                (Some(Arc::new(gate)), Some(controller))
            }
            None => (None, None),
        };
        tracing::debug!(
            "Starting {} workers over {} template(s), cap {}, rate {:?}",
            plan.concurrency,
            pool.len(),
            plan.max_requests,
            plan.rate
        );

        let workers: Vec<JoinHandle<AppResult<()>>> = (0..plan.concurrency.max(1))
            .map(|_| {
                let worker = Worker {
                    pool: Arc::clone(&pool),
                    builder: Arc::clone(&builder),
                    transport: Arc::clone(&transport),
                    stats: Arc::clone(&stats),
                    limiter: Arc::clone(&limiter),
                    rate: rate.clone(),
                    stop: stop.clone(),
                    timeout: plan.timeout,
                    capture_response: plan.capture_response,
                };
                tokio::spawn(worker.run())
            })
            .collect();

        let mut first_error = None;
        for handle in workers {
            let result = match handle.await {
                Ok(result) => result,
                Err(err) => Err(AppError::from(err)),
            };
            if let Err(err) = result
                && first_error.is_none()
            {
                first_error = Some(err);
            }
        }
        let elapsed = started.elapsed();
        stop.trigger();

        let tick_counts = sampler
            .await
            .map_err(|err| AppError::metrics(MetricsError::SamplerJoin { source: err }))?
            .map_err(AppError::metrics)?;
        if let Some(timer) = timer {
            drop(timer.await);
        }
        if let Some(controller) = rate_controller {
            drop(controller.await);
        }
        drop(forward.await);

        if let Some(err) = first_error {
            return Err(err);
        }

        let overall = stats.overall().snapshot().map_err(AppError::metrics)?;
        let endpoints = stats
            .endpoints()
            .iter()
            .map(|endpoint| endpoint.snapshot().map_err(AppError::metrics))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(RunResult {
            overall,
            endpoints,
            elapsed,
            total_issued: limiter.issued(),
            interrupted: shutdown.is_triggered(),
            tick_counts,
            sample_interval: plan.sample_interval,
            response: stats.captured(),
        })
    }
}

fn spawn_timer(duration: Duration, stop: &ShutdownSignal) -> JoinHandle<()> {
    let stop = stop.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(duration) => {
                stop.trigger();
            }
            () = stop.triggered() => {}
        }
    })
}

impl Worker {
    async fn run(self) -> AppResult<()> {
        loop {
            if self.stop.is_triggered() {
                break;
            }
            if let Some(rate) = &self.rate
                && !rate.acquire(&self.stop).await
            {
                break;
            }
            let Some(seq) = self.limiter.try_reserve(&self.stop) else {
                break;
            };
            let Some((index, template)) = self.pool.select() else {
                break;
            };
            let outcome = self.dispatch(index, template, seq).await;
            self.stats.record(&outcome).map_err(AppError::metrics)?;
        }
        Ok(())
    }

    async fn dispatch(&self, index: usize, template: &RequestTemplate, seq: u64) -> DispatchOutcome {
        let capture = self.capture_response && !self.stats.has_capture();
        let keep_body = capture || template.needs_body();

        let built = match self.builder.build(index, template, seq) {
            Ok(built) => built,
            Err(err) => {
                return self.failed(index, Duration::ZERO, 0, err.to_string(), capture);
            }
        };
        let write_bytes = built.write_bytes;
        let mut request = built.request;
        *request.timeout_mut() = Some(self.timeout);

        let start = Instant::now();
        let result = self.transport.send(request, keep_body).await;
        let latency = start.elapsed();

        match result {
            Ok(response) => {
                let assertion_failures = evaluate_all(
                    template.assertions(),
                    &ResponseView {
                        status: response.status,
                        headers: &response.headers,
                        body: &response.body,
                        duration: latency,
                    },
                );
                if capture {
                    self.stats.capture(CapturedResponse {
                        status: Some(response.status),
                        headers: response.headers,
                        body: response.body,
                        latency,
                        transport_error: None,
                        assertion_failures: assertion_failures.clone(),
                    });
                }
                DispatchOutcome {
                    template_index: index,
                    latency,
                    status: Some(response.status),
                    read_bytes: response.body_len,
                    write_bytes,
                    transport_error: None,
                    assertion_failures,
                }
            }
            Err(err) => {
                if err.timed_out {
                    tracing::debug!("Request {} timed out", seq);
                }
                self.failed(index, latency, write_bytes, err.message, capture)
            }
        }
    }

    fn failed(
        &self,
        index: usize,
        latency: Duration,
        write_bytes: u64,
        message: String,
        capture: bool,
    ) -> DispatchOutcome {
        if capture {
            self.stats.capture(CapturedResponse {
                status: None,
                headers: HeaderMap::new(),
                body: Bytes::new(),
                latency,
                transport_error: Some(message.clone()),
                assertion_failures: Vec::new(),
            });
        }
        DispatchOutcome {
            template_index: index,
            latency,
            status: None,
            read_bytes: 0,
            write_bytes,
            transport_error: Some(message),
            assertion_failures: Vec::new(),
        }
    }
}
