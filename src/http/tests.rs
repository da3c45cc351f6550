use super::*;
use crate::assertions::parse_assertion_lines;
use crate::shutdown::ShutdownSignal;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

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

struct FakeTransport {
    calls: AtomicU64,
    delay: Duration,
    content_type: &'static str,
    body: &'static str,
    fail_every: u64,
}

impl FakeTransport {
    fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            delay: Duration::ZERO,
            content_type: "application/json",
            body: r#"{"ok":true}"#,
            fail_every: 0,
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(
        &self,
        request: reqwest::Request,
        capture_body: bool,
    ) -> Result<TransportResponse, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }
        if call.checked_rem(self.fail_every) == Some(0) {
            return Err(TransportError {
                message: "connection reset".to_owned(),
                timed_out: false,
            });
        }
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        let status = if *request.method() == reqwest::Method::POST {
            201
        } else {
            200
        };
        Ok(TransportResponse {
            status,
            headers,
            body: if capture_body {
                Bytes::from_static(self.body.as_bytes())
            } else {
                Bytes::new()
            },
            body_len: u64::try_from(self.body.len()).unwrap_or(u64::MAX),
        })
    }
}

fn template(url: &str) -> Result<RequestTemplate, String> {
    RequestTemplate::new("GET", url).map_err(|err| err.to_string())
}

fn prepared(
    plan: RunPlan,
    templates: Vec<RequestTemplate>,
    transport: Arc<FakeTransport>,
) -> Result<Dispatcher, String> {
    let pool = TemplatePool::new(templates, LoadStrategy::RoundRobin).map_err(|err| err.to_string())?;
    let builder = RequestBuilder::new(&pool, None, &BTreeMap::new()).map_err(|err| err.to_string())?;
    Dispatcher::new(plan, Arc::new(pool), builder, transport).map_err(|err| err.to_string())
}

fn capped_plan(concurrency: usize, max_requests: u64) -> RunPlan {
    RunPlan {
        concurrency,
        duration: None,
        max_requests,
        sample_interval: Duration::from_millis(50),
        timeout: Duration::from_secs(5),
        capture_response: false,
        rate: None,
    }
}

#[test]
fn render_template_substitutes_vars() -> Result<(), String> {
    let vars = VariableSet::parse(&BTreeMap::from([("user".to_owned(), "alice".to_owned())]))
        .map_err(|err| err.to_string())?;
    let context = RenderContext {
        vars: &vars,
        seq: 42,
        now_ms: 1_700_000_123_456,
        peek: false,
    };
    let rendered = render_template("{{user}}-{{ seq }}-{{timestamp_s}}-{{unknown}}", &context);
    if rendered != "alice-42-1700000123-{{unknown}}" {
        return Err(format!("Unexpected render: {}", rendered));
    }
    Ok(())
}

#[test]
fn generators_produce_fresh_values() -> Result<(), String> {
    let definitions = BTreeMap::from([
        ("id".to_owned(), "sequence:5".to_owned()),
        ("pick".to_owned(), "choice: red , green,blue".to_owned()),
        ("roll".to_owned(), "random:3-6".to_owned()),
        ("token".to_owned(), "uuid".to_owned()),
        ("day".to_owned(), "now:date".to_owned()),
        ("plain".to_owned(), "fixed-value".to_owned()),
    ]);
    let vars = VariableSet::parse(&definitions).map_err(|err| err.to_string())?;
    let value = |name: &str| -> Result<String, String> {
        vars.get(name)
            .map(Variable::value)
            .ok_or_else(|| format!("Missing variable {}", name))
    };

    let ids = [value("id")?, value("id")?, value("id")?];
    if ids != ["5", "6", "7"] {
        return Err(format!("Sequence should count from its start: {:?}", ids));
    }
    for _ in 0..50 {
        let pick = value("pick")?;
        if !["red", "green", "blue"].contains(&pick.as_str()) {
            return Err(format!("Choice outside options: {}", pick));
        }
        let roll: i64 = value("roll")?.parse().map_err(|_err| "Random not numeric".to_owned())?;
        if !(3..=6).contains(&roll) {
            return Err(format!("Random outside range: {}", roll));
        }
    }
    let token = value("token")?;
    if token.len() != 36 || token == value("token")? {
        return Err(format!("Expected fresh UUIDs, got {}", token));
    }
    if value("day")?.len() != 10 || value("plain")? != "fixed-value" {
        return Err("Unexpected date or fixed value".to_owned());
    }

    let pool = TemplatePool::single(template("http://localhost/orders/{{order}}")?)
        .map_err(|err| err.to_string())?;
    let order = BTreeMap::from([("order".to_owned(), "sequence:5".to_owned())]);
    let builder = RequestBuilder::new(&pool, None, &order).map_err(|err| err.to_string())?;
    let (index, first) = pool.select().ok_or("Empty pool")?;
    let built = builder.build(index, first, 0).map_err(|err| err.to_string())?;
    if built.request.url().path() != "/orders/5" {
        return Err(format!("Checking templates must not consume a sequence value: {}", built.request.url()));
    }
    Ok(())
}

#[test]
fn generator_definitions_are_validated() -> Result<(), String> {
    for definition in ["random:9-1", "random:a-b", "sequence:x", "choice:", "choice: , ", "now:%Q%"] {
        match Variable::parse("v", definition) {
            Err(crate::error::ConfigError::InvalidVariable { .. }) => {}
            other => return Err(format!("'{}' should be rejected: {:?}", definition, other)),
        }
    }
    match Variable::parse("v", "random") {
        Ok(Variable::Random { min: 1, max: 1000 }) => {}
        other => return Err(format!("Unexpected default range: {:?}", other)),
    }
    match Variable::parse("v", "random:10") {
        Ok(Variable::Random { min: 0, max: 10 }) => {}
        other => return Err(format!("Unexpected max-only range: {:?}", other)),
    }
    match Variable::parse("v", "timestamp:iso8601") {
        Ok(Variable::Now(NowFormat::Rfc3339)) => {}
        other => return Err(format!("Unexpected time format: {:?}", other)),
    }

    let template = template("http://localhost/{{id}}")?;
    let pool = TemplatePool::single(template).map_err(|err| err.to_string())?;
    let vars = BTreeMap::from([("id".to_owned(), "choice:".to_owned())]);
    match RequestBuilder::new(&pool, None, &vars) {
        Err(err) if err.is_config() => Ok(()),
        other => Err(format!("Expected a config error: {:?}", other.map(|_| ()))),
    }
}

#[test]
fn rate_tokens_carry_remainder_across_ticks() -> Result<(), String> {
    let mut tokens = super::rate::RateTokens::new(15);
    let handed: Vec<usize> = (0..10).map(|_| tokens.next_tokens()).collect();
    if handed.iter().sum::<usize>() != 15 {
        return Err(format!("Expected 15 tokens per second, got {:?}", handed));
    }
    let mut slow = super::rate::RateTokens::new(3);
    let slow_total: usize = (0..20).map(|_| slow.next_tokens()).sum();
    if slow_total != 6 {
        return Err(format!("Expected 6 tokens over two seconds, got {}", slow_total));
    }
    Ok(())
}

#[test]
fn limiter_stops_exactly_at_cap() -> Result<(), String> {
    let stop = ShutdownSignal::new();
    let limiter = RequestLimiter::new(3);
    let reserved: Vec<Option<u64>> = (0..5).map(|_| limiter.try_reserve(&stop)).collect();
    if reserved != [Some(0), Some(1), Some(2), None, None] {
        return Err(format!("Unexpected reservations: {:?}", reserved));
    }
    if !stop.is_triggered() {
        return Err("Taking the last slot should fire stop".to_owned());
    }
    if limiter.issued() != 3 {
        return Err(format!("Expected 3 issued, got {}", limiter.issued()));
    }

    let unlimited = RequestLimiter::new(0);
    let unlimited_stop = ShutdownSignal::new();
    for _ in 0..10 {
        if unlimited.try_reserve(&unlimited_stop).is_none() {
            return Err("Unlimited limiter should never refuse".to_owned());
        }
    }
    if unlimited_stop.is_triggered() || unlimited.issued() != 10 {
        return Err("Unlimited limiter should only count".to_owned());
    }
    Ok(())
}

#[test]
fn concurrently_built_requests_carry_full_body() -> Result<(), String> {
    let body = "x".repeat(4096);
    let template = RequestTemplate::new("post", "http://localhost/upload")
        .map_err(|err| err.to_string())?
        .with_body(body.clone());
    let pool = TemplatePool::single(template).map_err(|err| err.to_string())?;
    let builder = Arc::new(
        RequestBuilder::new(&pool, None, &BTreeMap::new()).map_err(|err| err.to_string())?,
    );
    let pool = Arc::new(pool);

    let handles: Vec<_> = (0..4)
        .map(|seq| {
            let builder = Arc::clone(&builder);
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || -> Result<usize, String> {
                let (index, template) = pool.select().ok_or("Empty pool")?;
                let built = builder
                    .build(index, template, seq)
                    .map_err(|err| err.to_string())?;
                let len = built
                    .request
                    .body()
                    .and_then(reqwest::Body::as_bytes)
                    .map_or(0, <[u8]>::len);
                Ok(len)
            })
        })
        .collect();

    for handle in handles {
        let len = handle
            .join()
            .map_err(|_err| "Builder thread panicked".to_owned())??;
        if len != body.len() {
            return Err(format!("Expected {} body bytes, got {}", body.len(), len));
        }
    }
    Ok(())
}

#[test]
fn builder_renders_vars_and_resolves_base() -> Result<(), String> {
    let template = RequestTemplate::new("GET", "/items/{{seq}}?user={{user}}")
        .map_err(|err| err.to_string())?
        .with_header("X-Request", "req-{{seq}}")
        .map_err(|err| err.to_string())?;
    let pool = TemplatePool::single(template).map_err(|err| err.to_string())?;
    let vars = BTreeMap::from([("user".to_owned(), "bob".to_owned())]);
    let builder =
        RequestBuilder::new(&pool, Some("http://example.test/api/"), &vars).map_err(|err| err.to_string())?;
    let (index, template) = pool.select().ok_or("Empty pool")?;
    let built = builder.build(index, template, 7).map_err(|err| err.to_string())?;
    if built.request.url().as_str() != "http://example.test/api/items/7?user=bob" {
        return Err(format!("Unexpected url: {}", built.request.url()));
    }
    let header = built
        .request
        .headers()
        .get("x-request")
        .and_then(|value| value.to_str().ok());
    if header != Some("req-7") {
        return Err(format!("Unexpected header: {:?}", header));
    }
    Ok(())
}

#[test]
fn relative_url_without_base_fails_before_dispatch() -> Result<(), String> {
    let pool = TemplatePool::single(template("/health")?).map_err(|err| err.to_string())?;
    match RequestBuilder::new(&pool, None, &BTreeMap::new()) {
        Err(err) if err.to_string().contains("requires a base endpoint") => Ok(()),
        other => Err(format!("Unexpected result: {:?}", other.map(|_| ()))),
    }
}

#[test]
fn malformed_urls_are_config_errors() -> Result<(), String> {
    for url in ["/health", "http://[::1"] {
        let pool = TemplatePool::single(template(url)?).map_err(|err| err.to_string())?;
        match RequestBuilder::new(&pool, None, &BTreeMap::new()) {
            Err(err) if err.is_config() => {}
            other => return Err(format!("'{}' should be a config error: {:?}", url, other.map(|_| ()))),
        }
    }
    Ok(())
}

#[test]
fn invalid_templates_are_config_errors() -> Result<(), String> {
    if RequestTemplate::new("GE T", "http://localhost").is_ok() {
        return Err("Expected invalid method".to_owned());
    }
    if template("http://localhost")?
        .with_header("bad header", "x")
        .is_ok()
    {
        return Err("Expected invalid header name".to_owned());
    }
    match TemplatePool::new(Vec::new(), LoadStrategy::Random) {
        Err(err) if err.is_config() => {}
        other => return Err(format!("Expected empty pool error: {:?}", other.map(|_| ()))),
    }
    let zero = template("http://localhost")?.with_weight(0);
    match TemplatePool::new(vec![zero], LoadStrategy::Weighted) {
        Err(err) if err.is_config() => Ok(()),
        other => Err(format!("Expected weight error: {:?}", other.map(|_| ()))),
    }
}

#[test]
fn round_robin_cycles_templates() -> Result<(), String> {
    let pool = TemplatePool::new(
        vec![template("http://a.test")?, template("http://b.test")?, template("http://c.test")?],
        LoadStrategy::RoundRobin,
    )
    .map_err(|err| err.to_string())?;
    let picks: Vec<usize> = (0..6)
        .filter_map(|_| pool.select().map(|(index, _)| index))
        .collect();
    if picks != [0, 1, 2, 0, 1, 2] {
        return Err(format!("Unexpected picks: {:?}", picks));
    }
    Ok(())
}

#[test]
fn weighted_strategy_never_picks_outside_pool() -> Result<(), String> {
    let pool = TemplatePool::new(
        vec![
            template("http://a.test")?.with_weight(1),
            template("http://b.test")?.with_weight(5),
        ],
        LoadStrategy::Weighted,
    )
    .map_err(|err| err.to_string())?;
    for _ in 0..200 {
        match pool.select() {
            Some((0 | 1, _)) => {}
            other => return Err(format!("Unexpected pick: {:?}", other.map(|(index, _)| index))),
        }
    }
    Ok(())
}

#[test]
fn cap_is_exact_under_concurrency() -> Result<(), String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(async {
        for (concurrency, cap) in [(1_usize, 7_u64), (8, 100), (32, 5)] {
            let transport = Arc::new(FakeTransport::new());
            let dispatcher = prepared(
                capped_plan(concurrency, cap),
                vec![template("http://localhost/a")?, template("http://localhost/b")?],
                Arc::clone(&transport),
            )?;
            let result = dispatcher
                .run(&ShutdownSignal::new())
                .await
                .map_err(|err| err.to_string())?;
            let calls = transport.calls.load(Ordering::SeqCst);
            if calls != cap || result.overall.requests != cap || result.total_issued != cap {
                return Err(format!(
                    "W={} C={}: calls {}, recorded {}, issued {}",
                    concurrency, cap, calls, result.overall.requests, result.total_issued
                ));
            }
            let per_endpoint: u64 = result.endpoints.iter().map(|stats| stats.requests).sum();
            if per_endpoint != cap {
                return Err(format!("Endpoint totals {} != {}", per_endpoint, cap));
            }
            if result.interrupted {
                return Err("Capped run should not be interrupted".to_owned());
            }
        }
        Ok(())
    })
}

#[test]
fn assertion_failures_lower_success_rate() -> Result<(), String> {
    run_async_test(async {
        let mut transport = FakeTransport::new();
        transport.content_type = "text/plain";
        let transport = Arc::new(transport);
        let assertions = parse_assertion_lines(["status == 200", "header:Content-Type == \"application/json\""])
            .map_err(|err| err.to_string())?;
        let checked = template("http://localhost/json")?.with_assertions(assertions);
        let dispatcher = prepared(capped_plan(2, 10), vec![checked], transport)?;
        let result = dispatcher
            .run(&ShutdownSignal::new())
            .await
            .map_err(|err| err.to_string())?;
        if result.overall.assertion_failures != 10 || result.overall.successes != 0 {
            return Err(format!("Unexpected stats: {:?}", result.overall));
        }
        if result.overall.transport_failures != 0 || result.is_success() {
            return Err("Assertion failures must not count as transport failures".to_owned());
        }
        if result.overall.success_rate_x100() != 0 {
            return Err(format!("Unexpected success rate: {}", result.overall.success_rate_x100()));
        }
        Ok(())
    })
}

#[test]
fn transport_errors_are_grouped_and_do_not_stop_the_pool() -> Result<(), String> {
    run_async_test(async {
        let mut transport = FakeTransport::new();
        transport.fail_every = 4;
        let transport = Arc::new(transport);
        let dispatcher = prepared(capped_plan(3, 20), vec![template("http://localhost/")?], transport)?;
        let result = dispatcher
            .run(&ShutdownSignal::new())
            .await
            .map_err(|err| err.to_string())?;
        if result.overall.requests != 20 {
            return Err(format!("Expected 20 requests, got {}", result.overall.requests));
        }
        if result.overall.transport_errors.get("connection reset") != Some(&5) {
            return Err(format!("Unexpected errors: {:?}", result.overall.transport_errors));
        }
        if result.overall.successes != 15 {
            return Err(format!("Expected 15 successes, got {}", result.overall.successes));
        }
        Ok(())
    })
}

#[test]
fn cancelled_run_reports_actual_elapsed() -> Result<(), String> {
    run_async_test(async {
        let mut transport = FakeTransport::new();
        transport.delay = Duration::from_millis(5);
        let mut plan = capped_plan(2, 0);
        plan.duration = Some(Duration::from_secs(30));
        let dispatcher = prepared(plan, vec![template("http://localhost/")?], Arc::new(transport))?;
        let samples = dispatcher.subscribe();
        if samples.borrow().requests != 0 {
            return Err("Baseline sample should be zero".to_owned());
        }

        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.trigger();
        });
        let result = dispatcher.run(&shutdown).await.map_err(|err| err.to_string())?;
        if !result.interrupted {
            return Err("Run should be marked interrupted".to_owned());
        }
        if result.elapsed < Duration::from_millis(100) || result.elapsed > Duration::from_secs(5) {
            return Err(format!("Unexpected elapsed: {:?}", result.elapsed));
        }
        if result.overall.requests == 0 || result.overall.requests != result.total_issued {
            return Err(format!(
                "In-flight requests should be recorded: {} of {}",
                result.overall.requests, result.total_issued
            ));
        }
        Ok(())
    })
}

#[test]
fn capture_keeps_first_response() -> Result<(), String> {
    run_async_test(async {
        let mut plan = capped_plan(1, 3);
        plan.capture_response = true;
        let dispatcher = prepared(plan, vec![template("http://localhost/")?], Arc::new(FakeTransport::new()))?;
        let result = dispatcher
            .run(&ShutdownSignal::new())
            .await
            .map_err(|err| err.to_string())?;
        let response = result.response.ok_or("Expected a captured response")?;
        if response.status != Some(200) || response.body.as_ref() != br#"{"ok":true}"# {
            return Err(format!("Unexpected capture: {:?}", response));
        }
        Ok(())
    })
}
