use std::cell::OnceCell;
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::Value;

use super::{Assertion, AssertionOperator, AssertionTarget, ExpectedValue, JsonPath};

/// The parts of a response assertions can look at.
#[derive(Debug, Clone, Copy)]
pub struct ResponseView<'resp> {
    pub status: u16,
    pub headers: &'resp HeaderMap,
    pub body: &'resp [u8],
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    pub assertion: String,
    pub message: String,
}

impl fmt::Display for AssertionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.assertion, self.message)
    }
}

/// Evaluate every assertion and collect the failures. Empty means pass.
#[must_use]
pub fn evaluate_all(assertions: &[Assertion], response: &ResponseView<'_>) -> Vec<AssertionFailure> {
    let json = OnceCell::new();
    assertions
        .iter()
        .filter_map(|assertion| {
            evaluate_one(assertion, response, &json)
                .err()
                .map(|message| AssertionFailure {
                    assertion: assertion.source.clone(),
                    message,
                })
        })
        .collect()
}

fn evaluate_one(
    assertion: &Assertion,
    response: &ResponseView<'_>,
    json: &OnceCell<Option<Value>>,
) -> Result<(), String> {
    let operator = assertion.operator;
    match &assertion.target {
        AssertionTarget::Status => {
            compare_numbers(f64::from(response.status), operator, &assertion.expected)
        }
        AssertionTarget::DurationMs => {
            let millis = u32::try_from(response.duration.as_millis()).map_or(f64::MAX, f64::from);
            compare_numbers(millis, operator, &assertion.expected)
        }
        AssertionTarget::Body => {
            let body = String::from_utf8_lossy(response.body);
            compare_text(&body, operator, &assertion.expected)
        }
        AssertionTarget::Header(name) => evaluate_header(name, operator, &assertion.expected, response),
        AssertionTarget::BodyPath(path) => {
            let document = json.get_or_init(|| serde_json::from_slice(response.body).ok());
            evaluate_path(path, operator, &assertion.expected, document.as_ref())
        }
    }
}

fn evaluate_header(
    name: &str,
    operator: AssertionOperator,
    expected: &ExpectedValue,
    response: &ResponseView<'_>,
) -> Result<(), String> {
    // HeaderMap lookups are case-insensitive; `get` returns the first value.
    let value = response
        .headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());
    match operator {
        AssertionOperator::Exists => value
            .map(|_| ())
            .ok_or_else(|| format!("header '{}' does not exist", name)),
        AssertionOperator::NotExists => match value {
            Some(_) => Err(format!("header '{}' exists", name)),
            None => Ok(()),
        },
        AssertionOperator::Gt
        | AssertionOperator::Ge
        | AssertionOperator::Lt
        | AssertionOperator::Le => {
            let actual = value.unwrap_or_default();
            let number = actual
                .trim()
                .parse::<f64>()
                .map_err(|err| format!("header '{}' value '{}': {}", name, actual, err))?;
            compare_numbers(number, operator, expected)
        }
        AssertionOperator::Eq
        | AssertionOperator::Ne
        | AssertionOperator::Contains
        | AssertionOperator::NotContains
        | AssertionOperator::StartsWith
        | AssertionOperator::EndsWith
        | AssertionOperator::Matches => {
            compare_text(&value.unwrap_or_default(), operator, expected)
        }
    }
}

fn evaluate_path(
    path: &JsonPath,
    operator: AssertionOperator,
    expected: &ExpectedValue,
    document: Option<&Value>,
) -> Result<(), String> {
    let found = document.and_then(|root| path.lookup(root));
    match operator {
        AssertionOperator::Exists => {
            return found
                .map(|_| ())
                .ok_or_else(|| format!("json path '{}' does not exist", path));
        }
        AssertionOperator::NotExists => {
            return match found {
                Some(_) => Err(format!("json path '{}' exists", path)),
                None => Ok(()),
            };
        }
        AssertionOperator::Eq
        | AssertionOperator::Ne
        | AssertionOperator::Gt
        | AssertionOperator::Ge
        | AssertionOperator::Lt
        | AssertionOperator::Le
        | AssertionOperator::Contains
        | AssertionOperator::NotContains
        | AssertionOperator::StartsWith
        | AssertionOperator::EndsWith
        | AssertionOperator::Matches => {}
    }

    let Some(value) = found else {
        if document.is_none() {
            return Err("response body is not valid JSON".to_owned());
        }
        return Err(format!("json path '{}' does not exist", path));
    };

    match expected {
        ExpectedValue::Number(_) => {
            let number = json_number(value)
                .ok_or_else(|| format!("json path '{}' value {} is not a number", path, value))?;
            compare_numbers(number, operator, expected)
        }
        ExpectedValue::Bool(expected_flag) => {
            let actual = value
                .as_bool()
                .ok_or_else(|| format!("json path '{}' value {} is not a boolean", path, value))?;
            let equal = actual == *expected_flag;
            let passed = if operator == AssertionOperator::Ne {
                !equal
            } else {
                equal
            };
            if passed {
                Ok(())
            } else {
                Err(format!("actual={}, expected {} {}", actual, operator, expected_flag))
            }
        }
        ExpectedValue::None | ExpectedValue::Text(_) | ExpectedValue::Pattern(_) => {
            compare_text(&json_text(value), operator, expected)
        }
    }
}

/// Strings compare by their contents, everything else by its JSON rendering.
fn json_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            value.to_string()
        }
    }
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        Value::Null | Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    }
}

fn compare_numbers(
    actual: f64,
    operator: AssertionOperator,
    expected: &ExpectedValue,
) -> Result<(), String> {
    let ExpectedValue::Number(expected_number) = expected else {
        return Err(format!("expected value {} is not a number", expected));
    };
    let ordering = actual.total_cmp(expected_number);
    let passed = match operator {
        AssertionOperator::Eq => ordering == Ordering::Equal,
        AssertionOperator::Ne => ordering != Ordering::Equal,
        AssertionOperator::Gt => ordering == Ordering::Greater,
        AssertionOperator::Ge => ordering != Ordering::Less,
        AssertionOperator::Lt => ordering == Ordering::Less,
        AssertionOperator::Le => ordering != Ordering::Greater,
        AssertionOperator::Contains
        | AssertionOperator::NotContains
        | AssertionOperator::StartsWith
        | AssertionOperator::EndsWith
        | AssertionOperator::Matches
        | AssertionOperator::Exists
        | AssertionOperator::NotExists => {
            return Err(format!("operator '{}' not supported for numbers", operator));
        }
    };
    if passed {
        Ok(())
    } else {
        Err(format!("actual={}, expected {} {}", actual, operator, expected_number))
    }
}

fn compare_text(
    actual: &str,
    operator: AssertionOperator,
    expected: &ExpectedValue,
) -> Result<(), String> {
    if let ExpectedValue::Pattern(regex) = expected {
        return if regex.is_match(actual) {
            Ok(())
        } else {
            Err(format!("regex /{}/ does not match '{}'", regex.as_str(), actual))
        };
    }
    let expected_text = match expected {
        ExpectedValue::Text(text) => text.clone(),
        ExpectedValue::Number(number) => number.to_string(),
        ExpectedValue::Bool(flag) => flag.to_string(),
        ExpectedValue::None | ExpectedValue::Pattern(_) => String::new(),
    };
    let passed = match operator {
        AssertionOperator::Eq => actual == expected_text,
        AssertionOperator::Ne => actual != expected_text,
        AssertionOperator::Contains => actual.contains(&expected_text),
        AssertionOperator::NotContains => !actual.contains(&expected_text),
        AssertionOperator::StartsWith => actual.starts_with(&expected_text),
        AssertionOperator::EndsWith => actual.ends_with(&expected_text),
        AssertionOperator::Gt
        | AssertionOperator::Ge
        | AssertionOperator::Lt
        | AssertionOperator::Le
        | AssertionOperator::Matches
        | AssertionOperator::Exists
        | AssertionOperator::NotExists => {
            return Err(format!("operator '{}' not supported for text", operator));
        }
    };
    if passed {
        Ok(())
    } else {
        Err(format!(
            "actual='{}', expected {} '{}'",
            actual, operator, expected_text
        ))
    }
}
