use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::AppResult;
use crate::http::{
    Dispatcher, LoadStrategy, RequestBuilder, RequestTemplate, RunPlan, TemplatePool, Transport,
};
use crate::metrics::{RunResult, Sample};
use crate::shutdown::ShutdownSignal;

/// A plain load run against one template or a pool of templates.
#[derive(Debug, Clone)]
pub struct BenchmarkRequest {
    pub templates: Vec<RequestTemplate>,
    pub strategy: LoadStrategy,
    /// Resolves relative template URLs.
    pub base_url: Option<String>,
    pub vars: BTreeMap<String, String>,
    pub plan: RunPlan,
}

pub(super) async fn run_benchmark(
    request: &BenchmarkRequest,
    transport: &Arc<dyn Transport>,
    shutdown: &ShutdownSignal,
) -> AppResult<RunResult> {
    let pool = TemplatePool::new(request.templates.clone(), request.strategy)?;
    let builder = RequestBuilder::new(&pool, request.base_url.as_deref(), &request.vars)?;
    let dispatcher = Dispatcher::new(
        request.plan.clone(),
        Arc::new(pool),
        builder,
        Arc::clone(transport),
    )?;

    tracing::info!(
        "Starting benchmark: {} worker(s), {} template(s), {}",
        request.plan.concurrency,
        request.templates.len(),
        describe_stop(&request.plan)
    );
    let samples = tokio::spawn(log_samples(dispatcher.subscribe()));
    let result = dispatcher.run(shutdown).await;
    drop(samples.await);
    result
}

fn describe_stop(plan: &RunPlan) -> String {
    match (plan.duration, plan.max_requests) {
        (None, 0) => "until cancelled".to_owned(),
        (Some(duration), 0) => format!("duration {:?}", duration),
        (None, cap) => format!("cap {} request(s)", cap),
        (Some(duration), cap) => format!("duration {:?} or cap {} request(s)", duration, cap),
    }
}

async fn log_samples(mut rx: watch::Receiver<Sample>) {
    while rx.changed().await.is_ok() {
        let sample = *rx.borrow_and_update();
        tracing::info!(
            "{:>6.1}s  requests={} ok={} transport_err={} assert_fail={} tick={} p50={:?} p99={:?}",
            sample.elapsed.as_secs_f64(),
            sample.requests,
            sample.successes,
            sample.transport_failures,
            sample.assertion_failures,
            sample.tick_requests,
            sample.p50,
            sample.p99
        );
    }
}
