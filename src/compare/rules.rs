use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::assertions::{Assertion, JsonPath, ResponseView, evaluate_all, parse_assertion};
use crate::error::ConfigError;
use crate::metrics::CapturedResponse;

use super::{CompareEntry, PairLabel};

/// One check applied to a base/target pair.
#[derive(Debug, Clone)]
pub enum CompareRule {
    /// `status == status`
    StatusEq,
    /// `header[A] == header[B]`
    HeaderEq { base: String, target: String },
    /// `header[A] ignore`
    HeaderIgnore { name: String },
    /// `json "a" == json "b"`
    JsonEq { base: JsonPath, target: JsonPath },
    /// `assertions == assertions`
    AssertionsEq,
    /// Any single assertion, which both sides must pass.
    Assert(Assertion),
}

impl CompareRule {
    /// `status == status` and `assertions == assertions`.
    #[must_use]
    pub fn defaults() -> Vec<CompareRule> {
        vec![CompareRule::StatusEq, CompareRule::AssertionsEq]
    }
}

impl fmt::Display for CompareRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareRule::StatusEq => f.write_str("status == status"),
            CompareRule::HeaderEq { base, target } => {
                write!(f, "header[{}] == header[{}]", base, target)
            }
            CompareRule::HeaderIgnore { name } => write!(f, "header[{}] ignore", name),
            CompareRule::JsonEq { base, target } => {
                write!(f, "json \"{}\" == json \"{}\"", base, target)
            }
            CompareRule::AssertionsEq => f.write_str("assertions == assertions"),
            CompareRule::Assert(assertion) => write!(f, "{}", assertion),
        }
    }
}

/// Parse compare rule lines, skipping blank lines and `#` comments.
///
/// # Errors
///
/// Returns the first rule that fails to parse.
pub fn parse_compare_rules<I, S>(lines: I) -> Result<Vec<CompareRule>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut rules = Vec::new();
    for line in lines {
        let trimmed = line.as_ref().trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        rules.push(parse_compare_rule(trimmed)?);
    }
    Ok(rules)
}

/// Parse one compare rule. Lines that are not a two-sided rule are parsed as
/// a single assertion applied to both responses.
///
/// # Errors
///
/// Returns an error for a malformed two-sided rule or an invalid assertion.
pub fn parse_compare_rule(line: &str) -> Result<CompareRule, ConfigError> {
    let line = line.trim();
    let invalid = || ConfigError::InvalidCompareRule {
        line: line.to_owned(),
    };

    if line == "status == status" {
        return Ok(CompareRule::StatusEq);
    }
    if line == "assertions == assertions" {
        return Ok(CompareRule::AssertionsEq);
    }

    if let Some(rest) = line.strip_prefix("header[") {
        let (name, after) = rest.split_once(']').ok_or_else(invalid)?;
        let after = after.trim();
        if after == "ignore" {
            return Ok(CompareRule::HeaderIgnore {
                name: name.trim().to_owned(),
            });
        }
        let other = after
            .strip_prefix("==")
            .map(str::trim)
            .and_then(|other| other.strip_prefix("header["))
            .and_then(|other| other.strip_suffix(']'))
            .ok_or_else(invalid)?;
        return Ok(CompareRule::HeaderEq {
            base: name.trim().to_owned(),
            target: other.trim().to_owned(),
        });
    }

    if let Some((left, right)) = line.split_once("==")
        && let (Some(base), Some(target)) = (json_side(left), json_side(right))
    {
        return Ok(CompareRule::JsonEq { base, target });
    }

    parse_assertion(line).map(CompareRule::Assert)
}

/// `json "path"`, `gjson "path"`, or `json:path`.
fn json_side(raw: &str) -> Option<JsonPath> {
    let raw = raw.trim();
    if let Some(path) = raw.strip_prefix("json:") {
        return Some(JsonPath::parse(path));
    }
    let quoted = raw
        .strip_prefix("gjson")
        .or_else(|| raw.strip_prefix("json"))?
        .trim()
        .strip_prefix('"')?
        .strip_suffix('"')?;
    Some(JsonPath::parse(quoted))
}

/// Outcome of one rule for one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    pub label: PairLabel,
    pub rule: String,
    pub passed: bool,
    pub reason: String,
    pub base_value: String,
    pub target_value: String,
}

/// Apply `rule` to a completed pair.
#[must_use]
pub fn evaluate_rule(
    label: &PairLabel,
    rule: &CompareRule,
    base: &CompareEntry,
    target: &CompareEntry,
) -> ComparisonResult {
    let (passed, reason, base_value, target_value) = match rule {
        CompareRule::StatusEq => {
            let base_value = status_text(base.result.response.as_ref());
            let target_value = status_text(target.result.response.as_ref());
            let passed = base_value == target_value;
            let reason = if passed {
                "status codes match".to_owned()
            } else {
                "status codes differ".to_owned()
            };
            (passed, reason, base_value, target_value)
        }
        CompareRule::HeaderEq {
            base: base_name,
            target: target_name,
        } => {
            let base_value = header_text(base.result.response.as_ref(), base_name);
            let target_value = header_text(target.result.response.as_ref(), target_name);
            let passed = base_value == target_value;
            let reason = if passed {
                format!("header {} matches {}", base_name, target_name)
            } else {
                format!("header {} differs from {}", base_name, target_name)
            };
            (passed, reason, base_value, target_value)
        }
        CompareRule::HeaderIgnore { name } => (
            true,
            format!("header {} ignored", name),
            String::new(),
            String::new(),
        ),
        CompareRule::JsonEq {
            base: base_path,
            target: target_path,
        } => {
            let base_found = json_value(base.result.response.as_ref(), base_path);
            let target_found = json_value(target.result.response.as_ref(), target_path);
            match (base_found, target_found) {
                (Some(base_json), Some(target_json)) => {
                    let passed = base_json == target_json;
                    let reason = if passed {
                        "json values match".to_owned()
                    } else {
                        "json values differ".to_owned()
                    };
                    (passed, reason, base_json.to_string(), target_json.to_string())
                }
                (base_json, target_json) => (
                    false,
                    "json path missing".to_owned(),
                    base_json.map_or_else(|| "<missing>".to_owned(), |value| value.to_string()),
                    target_json.map_or_else(|| "<missing>".to_owned(), |value| value.to_string()),
                ),
            }
        }
        CompareRule::AssertionsEq => {
            let base_value = assertion_text(base);
            let target_value = assertion_text(target);
            let passed = base.assertions_passed() == target.assertions_passed();
            let reason = if passed {
                "assertion outcomes match".to_owned()
            } else {
                "assertion outcomes differ".to_owned()
            };
            (passed, reason, base_value, target_value)
        }
        CompareRule::Assert(assertion) => {
            let base_result = check_assertion(assertion, base.result.response.as_ref());
            let target_result = check_assertion(assertion, target.result.response.as_ref());
            let mut problems = Vec::new();
            if let Err(message) = &base_result {
                problems.push(format!("base failed: {}", message));
            }
            if let Err(message) = &target_result {
                problems.push(format!("target failed: {}", message));
            }
            let passed = problems.is_empty();
            let reason = if passed {
                "both sides pass".to_owned()
            } else {
                problems.join("; ")
            };
            (
                passed,
                reason,
                pass_text(&base_result),
                pass_text(&target_result),
            )
        }
    };

    ComparisonResult {
        label: label.clone(),
        rule: rule.to_string(),
        passed,
        reason,
        base_value,
        target_value,
    }
}

fn status_text(response: Option<&CapturedResponse>) -> String {
    match response {
        Some(CapturedResponse {
            status: Some(status),
            ..
        }) => status.to_string(),
        Some(CapturedResponse {
            transport_error: Some(error),
            ..
        }) => format!("error: {}", error),
        Some(_) | None => "<no response>".to_owned(),
    }
}

/// Missing headers compare as the empty string.
fn header_text(response: Option<&CapturedResponse>, name: &str) -> String {
    response
        .and_then(|response| response.headers.get(name))
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
        .unwrap_or_default()
}

fn json_value(response: Option<&CapturedResponse>, path: &JsonPath) -> Option<Value> {
    let response = response?;
    let document: Value = serde_json::from_slice(&response.body).ok()?;
    path.lookup(&document).cloned()
}

fn assertion_text(entry: &CompareEntry) -> String {
    let failures = entry.result.overall.assertion_failures;
    if entry.assertions_passed() {
        "pass".to_owned()
    } else {
        format!("fail ({} responses)", failures)
    }
}

fn check_assertion(
    assertion: &Assertion,
    response: Option<&CapturedResponse>,
) -> Result<(), String> {
    let Some(response) = response else {
        return Err("no response captured".to_owned());
    };
    let Some(status) = response.status else {
        return Err(response
            .transport_error
            .clone()
            .unwrap_or_else(|| "no response".to_owned()));
    };
    let failures = evaluate_all(
        std::slice::from_ref(assertion),
        &ResponseView {
            status,
            headers: &response.headers,
            body: &response.body,
            duration: response.latency,
        },
    );
    match failures.first() {
        Some(failure) => Err(failure.message.clone()),
        None => Ok(()),
    }
}

fn pass_text(result: &Result<(), String>) -> String {
    match result {
        Ok(()) => "pass".to_owned(),
        Err(_) => "fail".to_owned(),
    }
}
