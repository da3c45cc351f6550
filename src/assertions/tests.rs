use super::*;
use crate::error::ConfigError;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use std::time::Duration;

fn parse(line: &str) -> Result<Assertion, String> {
    parse_assertion(line).map_err(|err| format!("Failed to parse '{}': {}", line, err))
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.append("x-trace", HeaderValue::from_static("first"));
    headers.append("x-trace", HeaderValue::from_static("second"));
    headers.insert("x-count", HeaderValue::from_static("12"));
    headers
}

fn failures_for(lines: &[&str], headers: &HeaderMap, body: &str) -> Result<Vec<AssertionFailure>, String> {
    let assertions = parse_assertion_lines(lines.iter().copied()).map_err(|err| err.to_string())?;
    let view = ResponseView {
        status: 200,
        headers,
        body: body.as_bytes(),
        duration: Duration::from_millis(40),
    };
    Ok(evaluate_all(&assertions, &view))
}

const BODY: &str = r#"{"user":{"name":"alice","tags":["a","b"],"active":true,"age":31},"v1.2":"dotted","note":"foo==bar"}"#;

#[test]
fn passing_assertions_report_no_failures() -> Result<(), String> {
    let headers = json_headers();
    let failures = failures_for(
        &[
            "status == 200",
            "status < 300",
            "duration_ms <= 40",
            "header:Content-Type == \"application/json\"",
            "header \"content-type\" starts_with application/",
            "header:X-Trace == first",
            "header:X-Count >= 10",
            "header:X-Missing not_exists",
            "json:user.name == alice",
            "gjson \"user.tags.1\" == \"b\"",
            "$.user.active == true",
            "$.user.age > 30",
            "json:v1\\.2 == dotted",
            "json:user.name matches /^al/",
            "body contains alice",
            "body not_contains bob",
        ],
        &headers,
        BODY,
    )?;
    if !failures.is_empty() {
        return Err(format!("Unexpected failures: {:?}", failures));
    }
    Ok(())
}

#[test]
fn content_type_mismatch_is_reported() -> Result<(), String> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    let failures = failures_for(
        &["header:Content-Type == \"application/json\""],
        &headers,
        "plain",
    )?;
    let Some(failure) = failures.first() else {
        return Err("Expected a failure".to_owned());
    };
    if failures.len() != 1 {
        return Err(format!("Expected one failure, got {:?}", failures));
    }
    if !failure.message.contains("text/plain") {
        return Err(format!("Unexpected message: {}", failure.message));
    }
    Ok(())
}

#[test]
fn quoted_value_with_operator_text_is_literal() -> Result<(), String> {
    let assertion = parse("body contains \"foo==bar\"")?;
    match assertion.expected() {
        ExpectedValue::Text(text) if text == "foo==bar" => {}
        other => return Err(format!("Unexpected expected value: {:?}", other)),
    }
    if assertion.operator() != AssertionOperator::Contains {
        return Err(format!("Unexpected operator: {}", assertion.operator()));
    }
    let headers = HeaderMap::new();
    let failures = failures_for(&["json:note == \"foo==bar\""], &headers, BODY)?;
    if !failures.is_empty() {
        return Err(format!("Unexpected failures: {:?}", failures));
    }
    Ok(())
}

#[test]
fn missing_header_compares_as_empty() -> Result<(), String> {
    let headers = HeaderMap::new();
    let failures = failures_for(&["header:X-Absent == \"\"", "header:X-Absent exists"], &headers, "")?;
    let messages: Vec<&str> = failures.iter().map(|failure| failure.assertion.as_str()).collect();
    if messages != ["header:X-Absent exists"] {
        return Err(format!("Unexpected failures: {:?}", messages));
    }
    Ok(())
}

#[test]
fn body_path_failures_are_descriptive() -> Result<(), String> {
    let headers = HeaderMap::new();
    let failures = failures_for(
        &["json:user.missing exists", "json:user.age == 40", "json:user.name == bob"],
        &headers,
        BODY,
    )?;
    if failures.len() != 3 {
        return Err(format!("Expected three failures, got {:?}", failures));
    }
    let not_json = failures_for(&["json:user.name == alice"], &headers, "<html>")?;
    match not_json.first() {
        Some(failure) if failure.message.contains("not valid JSON") => Ok(()),
        other => Err(format!("Unexpected failure: {:?}", other)),
    }
}

#[test]
fn comments_and_blank_lines_are_skipped() -> Result<(), String> {
    let assertions = parse_assertion_block("# status checks\n\nstatus == 200\n   \nbody contains ok\n")
        .map_err(|err| err.to_string())?;
    if assertions.len() != 2 {
        return Err(format!("Expected 2 assertions, got {}", assertions.len()));
    }
    if !needs_body(&assertions) {
        return Err("Body assertion should require the body".to_owned());
    }
    Ok(())
}

#[test]
fn matches_outside_body_path_is_config_error() -> Result<(), String> {
    match parse_assertion("header:Server matches /nginx/") {
        Err(ConfigError::MatchesRequiresBodyPath { .. }) => Ok(()),
        other => Err(format!("Unexpected result: {:?}", other)),
    }
}

#[test]
fn invalid_assertions_are_rejected() -> Result<(), String> {
    let cases = [
        "status",
        "cookie == 1",
        "status ~= 200",
        "status == abc",
        "status contains 2",
        "body > 3",
        "json:a exists true",
        "json:a ==",
        "json:a matches /(/",
        "header \"Unterminated == 1",
        "body == \"open",
    ];
    for case in cases {
        if parse_assertion(case).is_ok() {
            return Err(format!("Expected '{}' to be rejected", case));
        }
    }
    Ok(())
}

#[test]
fn json_path_handles_indices_and_escapes() -> Result<(), String> {
    let document: serde_json::Value =
        serde_json::from_str(BODY).map_err(|err| format!("Invalid fixture: {}", err))?;
    let tag = JsonPath::parse("$.user.tags.0").lookup(&document);
    if tag != Some(&serde_json::Value::String("a".to_owned())) {
        return Err(format!("Unexpected lookup: {:?}", tag));
    }
    let dotted = JsonPath::parse("v1\\.2");
    if dotted.segments() != ["v1.2".to_owned()] {
        return Err(format!("Unexpected segments: {:?}", dotted.segments()));
    }
    if JsonPath::parse("user.tags.9").lookup(&document).is_some() {
        return Err("Out of range index should not resolve".to_owned());
    }
    Ok(())
}
