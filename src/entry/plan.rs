use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::args::TesterArgs;
use crate::assertions::{Assertion, parse_assertion_lines};
use crate::config::{load_batch_config, load_compare_config};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};
use crate::http::{RequestTemplate, RunPlan as DispatchPlan};
use crate::run::{BatchExecution, BatchRequest, BenchmarkRequest, RunRequest};

/// What the command line asked for.
#[derive(Debug)]
pub(super) struct RunPlan {
    pub(super) request: RunRequest,
    pub(super) every: Option<Duration>,
    pub(super) max_runs: Option<u64>,
}

pub(super) fn build_plan(args: &TesterArgs) -> AppResult<RunPlan> {
    check_modes(args)?;
    let request = if let Some(path) = &args.compare_config {
        let mut suite = load_compare_config(path, &args.vars)?;
        suite.plan.sample_interval = args.sample_interval;
        if let Some(rate) = args.rate {
            suite.plan.rate = Some(rate.get());
        }
        RunRequest::Compare(suite)
    } else if let Some(path) = &args.batch_config {
        let mut suite = load_batch_config(path, &args.vars)?;
        for test in &mut suite.tests {
            test.plan.sample_interval = args.sample_interval;
            if let Some(rate) = args.rate {
                test.plan.rate = Some(rate.get());
            }
        }
        let execution = if args.batch_sequential {
            BatchExecution::Sequential
        } else {
            BatchExecution::Concurrent(args.batch_concurrency.get())
        };
        RunRequest::Batch(BatchRequest { suite, execution })
    } else {
        RunRequest::Benchmark(benchmark_request(args)?)
    };

    Ok(RunPlan {
        request,
        every: args.every,
        max_runs: args.max_runs.map(u64::from),
    })
}

fn check_modes(args: &TesterArgs) -> Result<(), ValidationError> {
    if args.batch_config.is_some() && args.compare_config.is_some() {
        return Err(ValidationError::ModeConflict {
            left: "--batch-config",
            right: "--compare-config",
        });
    }
    if args.url.is_some() && args.urls_file.is_some() {
        return Err(ValidationError::ModeConflict {
            left: "URL",
            right: "--urls-file",
        });
    }
    if args.batch_sequential && args.batch_config.is_none() {
        return Err(ValidationError::ModeConflict {
            left: "--batch-sequential",
            right: "a run without --batch-config",
        });
    }
    if args.max_runs.is_some() && args.every.is_none() {
        return Err(ValidationError::MaxRunsRequiresEvery);
    }
    Ok(())
}

fn benchmark_request(args: &TesterArgs) -> AppResult<BenchmarkRequest> {
    let targets = match (&args.url, &args.urls_file) {
        (Some(url), _) => vec![(url.clone(), 1)],
        (None, Some(path)) => read_urls_file(path)?,
        (None, None) => return Err(AppError::validation(ValidationError::MissingUrl)),
    };
    let assertions = parse_assertion_lines(&args.asserts)?;

    let templates = targets
        .into_iter()
        .map(|(url, weight)| template_for(args, url, weight, &assertions))
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let plan = DispatchPlan {
        concurrency: args.concurrency.get(),
        sample_interval: args.sample_interval,
        timeout: args.timeout,
        rate: args.rate.map(u64::from),
        ..DispatchPlan::default()
    }
    .with_stop(args.duration, args.requests.map(u64::from));

    Ok(BenchmarkRequest {
        templates,
        strategy: args.load_strategy,
        base_url: None,
        vars: args.vars.iter().cloned().collect::<BTreeMap<_, _>>(),
        plan,
    })
}

fn template_for(
    args: &TesterArgs,
    url: String,
    weight: u32,
    assertions: &[Assertion],
) -> Result<RequestTemplate, ConfigError> {
    let mut template = RequestTemplate::new(args.method.as_str(), url)?.with_headers(
        args.headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str())),
    )?;
    let has_content_type = args
        .headers
        .iter()
        .any(|(name, _)| name.trim().eq_ignore_ascii_case("content-type"));
    if let Some(content_type) = &args.content_type
        && !has_content_type
    {
        template = template.with_header("Content-Type", content_type)?;
    }
    Ok(template
        .with_body(args.data.as_str())
        .with_assertions(assertions.to_vec())
        .with_weight(weight))
}

/// One URL per line, optionally followed by a weight. Blank lines and `#`
/// comments are skipped.
fn read_urls_file(path: &Path) -> AppResult<Vec<(String, u32)>> {
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::validation(ValidationError::ReadUrlsFile {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    let targets = parse_url_lines(&content)?;
    if targets.is_empty() {
        return Err(AppError::validation(ValidationError::UrlsFileEmpty {
            path: path.to_path_buf(),
        }));
    }
    tracing::debug!("Loaded {} URL(s) from '{}'", targets.len(), path.display());
    Ok(targets)
}

fn parse_url_lines(content: &str) -> Result<Vec<(String, u32)>, ValidationError> {
    let mut targets = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let Some(url) = parts.next() else {
            continue;
        };
        let weight = match parts.next() {
            Some(raw) => raw
                .parse::<u32>()
                .map_err(|err| ValidationError::InvalidNumber { source: err })?,
            None => 1,
        };
        targets.push((url.to_owned(), weight));
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    fn parse(argv: &[&str]) -> Result<TesterArgs, String> {
        TesterArgs::try_parse_from(argv).map_err(|err| err.to_string())
    }

    #[test]
    fn url_builds_benchmark_with_default_duration() -> Result<(), String> {
        let args = parse(&["volley", "http://svc.test/", "--assert", "status == 200"])?;
        let plan = build_plan(&args).map_err(|err| err.to_string())?;
        let RunRequest::Benchmark(benchmark) = plan.request else {
            return Err("Expected a benchmark request".to_owned());
        };
        if benchmark.plan.duration != Some(Duration::from_secs(10))
            || benchmark.plan.max_requests != 0
        {
            return Err(format!("Unexpected plan: {:?}", benchmark.plan));
        }
        let template = benchmark.templates.first().ok_or("Missing template")?;
        if template.assertions().len() != 1 {
            return Err("Assertion should be attached".to_owned());
        }
        Ok(())
    }

    #[test]
    fn request_cap_alone_runs_until_cap() -> Result<(), String> {
        let args = parse(&["volley", "http://svc.test/", "-n", "50"])?;
        let plan = build_plan(&args).map_err(|err| err.to_string())?;
        let RunRequest::Benchmark(benchmark) = plan.request else {
            return Err("Expected a benchmark request".to_owned());
        };
        if benchmark.plan.duration.is_some() || benchmark.plan.max_requests != 50 {
            return Err(format!("Unexpected plan: {:?}", benchmark.plan));
        }
        Ok(())
    }

    #[test]
    fn rate_and_content_type_reach_the_benchmark() -> Result<(), String> {
        let args = parse(&[
            "volley",
            "http://svc.test/",
            "-X",
            "post",
            "--data",
            "{}",
            "--content-type",
            "application/json",
            "-R",
            "25",
        ])?;
        if args.batch_concurrency.get() != 3 {
            return Err(format!("Unexpected batch concurrency: {}", args.batch_concurrency.get()));
        }
        let plan = build_plan(&args).map_err(|err| err.to_string())?;
        let RunRequest::Benchmark(benchmark) = plan.request else {
            return Err("Expected a benchmark request".to_owned());
        };
        if benchmark.plan.rate != Some(25) {
            return Err(format!("Unexpected rate: {:?}", benchmark.plan.rate));
        }
        let content_types = |request: &BenchmarkRequest| -> Result<Vec<String>, String> {
            let pool = crate::http::TemplatePool::single(
                request.templates.first().ok_or("Missing template")?.clone(),
            )
            .map_err(|err| err.to_string())?;
            let builder = crate::http::RequestBuilder::new(&pool, None, &BTreeMap::new())
                .map_err(|err| err.to_string())?;
            let (index, template) = pool.select().ok_or("Empty pool")?;
            let built = builder.build(index, template, 0).map_err(|err| err.to_string())?;
            Ok(built
                .request
                .headers()
                .get_all("content-type")
                .iter()
                .filter_map(|value| value.to_str().ok().map(str::to_owned))
                .collect())
        };
        if content_types(&benchmark)? != ["application/json"] {
            return Err("--content-type should set the header".to_owned());
        }

        let explicit_args = parse(&[
            "volley",
            "http://svc.test/",
            "-H",
            "content-type: text/plain",
            "--content-type",
            "application/json",
        ])?;
        let RunRequest::Benchmark(explicit) = build_plan(&explicit_args).map_err(|err| err.to_string())?.request
        else {
            return Err("Expected a benchmark request".to_owned());
        };
        if content_types(&explicit)? != ["text/plain"] {
            return Err("An explicit header should win over --content-type".to_owned());
        }
        Ok(())
    }

    #[test]
    fn missing_url_is_rejected() -> Result<(), String> {
        let args = parse(&["volley"])?;
        match build_plan(&args) {
            Err(AppError::Validation(ValidationError::MissingUrl)) => Ok(()),
            Err(err) => Err(format!("Unexpected error: {}", err)),
            Ok(_) => Err("Expected a missing URL error".to_owned()),
        }
    }

    #[test]
    fn conflicting_modes_are_rejected() -> Result<(), String> {
        let args = parse(&[
            "volley",
            "--batch-config",
            "a.toml",
            "--compare-config",
            "b.toml",
        ])?;
        if !matches!(
            build_plan(&args),
            Err(AppError::Validation(ValidationError::ModeConflict { .. }))
        ) {
            return Err("Batch and compare together must fail".to_owned());
        }
        let args = parse(&["volley", "http://svc.test/", "--max-runs", "3"])?;
        if !matches!(
            build_plan(&args),
            Err(AppError::Validation(ValidationError::MaxRunsRequiresEvery))
        ) {
            return Err("--max-runs without --every must fail".to_owned());
        }
        Ok(())
    }

    #[test]
    fn invalid_assertion_fails_before_dispatch() -> Result<(), String> {
        let args = parse(&["volley", "http://svc.test/", "--assert", "body matches /x/"])?;
        match build_plan(&args) {
            Err(err) if err.is_config() => Ok(()),
            Err(err) => Err(format!("Unexpected error: {}", err)),
            Ok(_) => Err("matches on body must be rejected".to_owned()),
        }
    }

    #[test]
    fn urls_file_reads_weights_and_skips_comments() -> Result<(), String> {
        let mut file = tempfile::NamedTempFile::new().map_err(|err| err.to_string())?;
        writeln!(
            file,
            "# targets\nhttp://a.test/ 3\n\nhttp://b.test/\n"
        )
        .map_err(|err| err.to_string())?;
        let path = file.path().to_string_lossy().into_owned();
        let args = parse(&[
            "volley",
            "--urls-file",
            &path,
            "--load-strategy",
            "weighted",
        ])?;
        let plan = build_plan(&args).map_err(|err| err.to_string())?;
        let RunRequest::Benchmark(benchmark) = plan.request else {
            return Err("Expected a benchmark request".to_owned());
        };
        let weights: Vec<u32> = benchmark
            .templates
            .iter()
            .map(RequestTemplate::weight)
            .collect();
        if weights != [3, 1] {
            return Err(format!("Unexpected weights: {:?}", weights));
        }
        Ok(())
    }

    #[test]
    fn empty_urls_file_is_rejected() -> Result<(), String> {
        let file = tempfile::NamedTempFile::new().map_err(|err| err.to_string())?;
        let path = file.path().to_string_lossy().into_owned();
        let args = parse(&["volley", "--urls-file", &path])?;
        match build_plan(&args) {
            Err(AppError::Validation(ValidationError::UrlsFileEmpty { .. })) => Ok(()),
            Err(err) => Err(format!("Unexpected error: {}", err)),
            Ok(_) => Err("Empty URL file must fail".to_owned()),
        }
    }
}
