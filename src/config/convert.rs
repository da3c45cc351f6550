use std::collections::BTreeMap;
use std::time::Duration;

use crate::args::parsers::parse_duration_value;
use crate::assertions::parse_assertion_lines;
use crate::compare::{
    CompareScenario, CompareSuite, PairingStrategy, ScenarioSide, parse_compare_rules,
};
use crate::error::{AppResult, ConfigError, ValidationError};
use crate::http::{RequestTemplate, RunPlan};
use crate::run::{BatchSuite, BatchTest};

use super::types::{
    BatchDocument, BatchTestDocument, CompareDocument, DurationValue, LineList, ScenarioDocument,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_BATCH_CONCURRENCY: usize = 10;
const DEFAULT_COMPARE_CONCURRENCY: usize = 1;
const DEFAULT_COMPARE_REQUESTS: u64 = 1;

struct RequestParts<'doc> {
    name: &'doc str,
    method: Option<&'doc str>,
    url: &'doc str,
    headers: Option<&'doc BTreeMap<String, String>>,
    body: Option<&'doc str>,
    asserts: Option<&'doc LineList>,
}

fn build_template(parts: &RequestParts<'_>) -> Result<RequestTemplate, ConfigError> {
    let mut template = RequestTemplate::new(parts.method.unwrap_or("GET"), parts.url)?
        .with_name(parts.name)
        .with_body(parts.body.unwrap_or_default());
    if let Some(headers) = parts.headers {
        template = template.with_headers(
            headers
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str())),
        )?;
    }
    if let Some(asserts) = parts.asserts {
        template = template.with_assertions(parse_assertion_lines(asserts.lines())?);
    }
    Ok(template)
}

fn duration_value(value: &DurationValue) -> Result<Duration, ConfigError> {
    match value {
        DurationValue::Seconds(0) => Err(ConfigError::InvalidDuration {
            value: "0".to_owned(),
            source: ValidationError::DurationZero,
        }),
        DurationValue::Seconds(seconds) => Ok(Duration::from_secs(*seconds)),
        DurationValue::Text(text) => {
            parse_duration_value(text).map_err(|err| ConfigError::InvalidDuration {
                value: text.clone(),
                source: err,
            })
        }
    }
}

fn optional_duration(value: Option<&DurationValue>) -> Result<Option<Duration>, ConfigError> {
    value.map(duration_value).transpose()
}

fn positive_usize(field: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::FieldMustBePositive {
            field: field.to_owned(),
        });
    }
    Ok(value)
}

fn positive_u64(field: &str, value: Option<u64>) -> Result<Option<u64>, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::FieldMustBePositive {
            field: field.to_owned(),
        }),
        Some(_) | None => Ok(value),
    }
}

pub(super) fn compare_suite_from_document(document: CompareDocument) -> AppResult<CompareSuite> {
    let strategy = PairingStrategy::parse(
        document.mode.as_deref().unwrap_or_default(),
        document.group_field.as_deref(),
    )?;
    let rules = match document.compare.as_ref() {
        Some(lines) => parse_compare_rules(lines.lines())?,
        None => Vec::new(),
    };

    let concurrency = positive_usize(
        "concurrency",
        document.concurrency.unwrap_or(DEFAULT_COMPARE_CONCURRENCY),
    )?;
    let duration = optional_duration(document.duration.as_ref())?;
    let requests = match (duration, positive_u64("requests", document.requests)?) {
        (None, None) => Some(DEFAULT_COMPARE_REQUESTS),
        (_, requests) => requests,
    };
    let timeout = optional_duration(document.timeout.as_ref())?.unwrap_or(DEFAULT_TIMEOUT);
    let plan = RunPlan {
        concurrency,
        timeout,
        rate: positive_u64("rate", document.rate)?,
        ..RunPlan::default()
    }
    .with_stop(duration, requests);

    let scenarios = document
        .scenarios
        .iter()
        .enumerate()
        .map(|(index, scenario)| compare_scenario(index, scenario))
        .collect::<Result<Vec<_>, ConfigError>>()?;

    let suite = CompareSuite {
        base: document.base.unwrap_or_default(),
        target: document.target.unwrap_or_default(),
        strategy,
        rules,
        scenarios,
        plan,
        vars: document.vars.unwrap_or_default(),
    };
    suite.validate()?;
    Ok(suite)
}

fn compare_scenario(
    index: usize,
    scenario: &ScenarioDocument,
) -> Result<CompareScenario, ConfigError> {
    let name = scenario
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or(ConfigError::ScenarioMissingName { index })?;
    let template = build_template(&RequestParts {
        name,
        method: scenario.method.as_deref(),
        url: scenario.url.as_deref().unwrap_or("/"),
        headers: scenario.headers.as_ref(),
        body: scenario.body.as_deref(),
        asserts: scenario.asserts.as_ref(),
    })?;
    let side = ScenarioSide::parse(scenario.side.as_deref().unwrap_or_default())?;
    let targets = scenario
        .targets
        .iter()
        .flatten()
        .map(|target| target.trim())
        .filter(|target| !target.is_empty())
        .map(str::to_owned)
        .collect();
    Ok(CompareScenario {
        name: name.to_owned(),
        template,
        fields: scenario.fields.clone().unwrap_or_default(),
        side,
        targets,
    })
}

pub(super) fn batch_suite_from_document(document: BatchDocument) -> AppResult<BatchSuite> {
    if document.tests.is_empty() {
        return Err(ConfigError::BatchNoTests.into());
    }
    let tests = document
        .tests
        .iter()
        .enumerate()
        .map(|(index, test)| batch_test(index, test))
        .collect::<Result<Vec<_>, ConfigError>>()?;
    Ok(BatchSuite {
        tests,
        vars: document.vars.unwrap_or_default(),
    })
}

fn batch_test(index: usize, test: &BatchTestDocument) -> Result<BatchTest, ConfigError> {
    let name = test
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map_or_else(|| format!("test-{}", index.saturating_add(1)), str::to_owned);
    let url = test
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ConfigError::BatchTestMissingUrl { name: name.clone() })?;

    let template = build_template(&RequestParts {
        name: &name,
        method: test.method.as_deref(),
        url,
        headers: test.headers.as_ref(),
        body: test.body.as_deref(),
        asserts: test.asserts.as_ref(),
    })?;

    let concurrency = positive_usize(
        "concurrency",
        test.concurrency.unwrap_or(DEFAULT_BATCH_CONCURRENCY),
    )?;
    let timeout = optional_duration(test.timeout.as_ref())?.unwrap_or(DEFAULT_TIMEOUT);
    let plan = RunPlan {
        concurrency,
        timeout,
        rate: positive_u64("rate", test.rate)?,
        ..RunPlan::default()
    }
    .with_stop(
        optional_duration(test.duration.as_ref())?,
        positive_u64("requests", test.requests)?,
    );

    Ok(BatchTest {
        name,
        template,
        plan,
    })
}
