use regex::Regex;

use crate::error::ConfigError;

use super::{Assertion, AssertionOperator, AssertionTarget, ExpectedValue, JsonPath};

/// Parse a multi-line assertion block, skipping blank lines and `#` comments.
///
/// # Errors
///
/// Returns the first line that fails to parse.
pub fn parse_assertion_block(text: &str) -> Result<Vec<Assertion>, ConfigError> {
    parse_assertion_lines(text.lines())
}

/// Parse assertion lines, skipping blank lines and `#` comments.
///
/// # Errors
///
/// Returns the first line that fails to parse.
pub fn parse_assertion_lines<I, S>(lines: I) -> Result<Vec<Assertion>, ConfigError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut assertions = Vec::new();
    for line in lines {
        let trimmed = line.as_ref().trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        assertions.push(parse_assertion(trimmed)?);
    }
    Ok(assertions)
}

/// Parse a single assertion such as `header:Content-Type == "application/json"`.
///
/// The operator is the first token after the target; everything after it is
/// the expected value, so quoted values may contain operator-like text.
///
/// # Errors
///
/// Returns an error for unknown targets or operators, missing or unexpected
/// values, operators the target does not support, non-numeric values for
/// numeric comparisons, and invalid regexes.
pub fn parse_assertion(line: &str) -> Result<Assertion, ConfigError> {
    let source = line.trim();
    let (target, rest) = parse_target(source)?;

    let rest = rest.trim_start();
    if rest.is_empty() {
        return Err(ConfigError::AssertionMissingOperator {
            line: source.to_owned(),
        });
    }
    let (operator_token, value_part) = split_word(rest);
    let operator = AssertionOperator::parse(operator_token).ok_or_else(|| {
        ConfigError::UnknownAssertionOperator {
            line: source.to_owned(),
            operator: operator_token.to_owned(),
        }
    })?;

    let literal = parse_literal(source, value_part)?;
    check_operator(source, &target, operator)?;

    let expected = match (operator.takes_value(), literal) {
        (false, None) => ExpectedValue::None,
        (false, Some(_)) => {
            return Err(ConfigError::AssertionUnexpectedValue {
                line: source.to_owned(),
                operator: operator.as_str().to_owned(),
            });
        }
        (true, None) => {
            return Err(ConfigError::AssertionMissingValue {
                line: source.to_owned(),
                operator: operator.as_str().to_owned(),
            });
        }
        (true, Some(literal)) => typed_value(source, &target, operator, literal)?,
    };

    Ok(Assertion {
        source: source.to_owned(),
        target,
        operator,
        expected,
    })
}

struct Literal {
    text: String,
    quoted: bool,
}

fn parse_target(line: &str) -> Result<(AssertionTarget, &str), ConfigError> {
    if let Some((name, rest)) = quoted_argument(line, "header")? {
        return Ok((AssertionTarget::Header(name), rest));
    }
    if let Some((path, rest)) = quoted_argument(line, "gjson")? {
        return Ok((AssertionTarget::BodyPath(JsonPath::parse(&path)), rest));
    }

    let (word, rest) = split_word(line);
    let target = match word {
        "status" => AssertionTarget::Status,
        "duration_ms" => AssertionTarget::DurationMs,
        "body" => AssertionTarget::Body,
        other => {
            if let Some(name) = other.strip_prefix("header:")
                && !name.is_empty()
            {
                AssertionTarget::Header(name.to_owned())
            } else if let Some(path) = other.strip_prefix("json:")
                && !path.is_empty()
            {
                AssertionTarget::BodyPath(JsonPath::parse(path))
            } else if other.starts_with('$') {
                AssertionTarget::BodyPath(JsonPath::parse(other))
            } else {
                return Err(ConfigError::UnknownAssertionTarget {
                    line: line.to_owned(),
                });
            }
        }
    };
    Ok((target, rest))
}

/// `keyword "argument" rest...` form. `None` when the line does not start
/// with the keyword followed by a quoted string.
fn quoted_argument<'line>(
    line: &'line str,
    keyword: &str,
) -> Result<Option<(String, &'line str)>, ConfigError> {
    let Some(after) = line.strip_prefix(keyword) else {
        return Ok(None);
    };
    if !after.starts_with(char::is_whitespace) {
        return Ok(None);
    }
    let after = after.trim_start();
    if !after.starts_with('"') {
        return Ok(None);
    }
    take_quoted(after)
        .map(Some)
        .ok_or_else(|| ConfigError::UnterminatedQuote {
            line: line.to_owned(),
        })
}

/// Split a leading `"..."` off `input`, resolving `\"` and `\\` escapes.
fn take_quoted(input: &str) -> Option<(String, &str)> {
    let inner = input.strip_prefix('"')?;
    let mut value = String::new();
    let mut escaped = false;
    for (idx, ch) in inner.char_indices() {
        if escaped {
            if ch != '"' && ch != '\\' {
                value.push('\\');
            }
            value.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' => {
                let rest = inner.get(idx.saturating_add(1)..).unwrap_or("");
                return Some((value, rest));
            }
            other => value.push(other),
        }
    }
    None
}

fn split_word(input: &str) -> (&str, &str) {
    input
        .split_once(char::is_whitespace)
        .unwrap_or((input, ""))
}

fn parse_literal(line: &str, raw: &str) -> Result<Option<Literal>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if !raw.starts_with('"') {
        return Ok(Some(Literal {
            text: raw.to_owned(),
            quoted: false,
        }));
    }
    match take_quoted(raw) {
        Some((text, rest)) if rest.trim().is_empty() => Ok(Some(Literal { text, quoted: true })),
        Some(_) | None => Err(ConfigError::UnterminatedQuote {
            line: line.to_owned(),
        }),
    }
}

fn check_operator(
    line: &str,
    target: &AssertionTarget,
    operator: AssertionOperator,
) -> Result<(), ConfigError> {
    if operator == AssertionOperator::Matches && !matches!(target, AssertionTarget::BodyPath(_)) {
        return Err(ConfigError::MatchesRequiresBodyPath {
            line: line.to_owned(),
            target: target.to_string(),
        });
    }

    let supported = match target {
        AssertionTarget::Status | AssertionTarget::DurationMs => {
            matches!(operator, AssertionOperator::Eq | AssertionOperator::Ne)
                || operator.is_ordering()
        }
        AssertionTarget::Body => {
            matches!(operator, AssertionOperator::Eq | AssertionOperator::Ne)
                || operator.is_textual()
        }
        AssertionTarget::Header(_) | AssertionTarget::BodyPath(_) => true,
    };
    if supported {
        Ok(())
    } else {
        Err(ConfigError::OperatorNotSupported {
            line: line.to_owned(),
            operator: operator.as_str().to_owned(),
            target: target.to_string(),
        })
    }
}

fn typed_value(
    line: &str,
    target: &AssertionTarget,
    operator: AssertionOperator,
    literal: Literal,
) -> Result<ExpectedValue, ConfigError> {
    if operator == AssertionOperator::Matches {
        let pattern = regex_body(&literal.text);
        let regex = Regex::new(pattern).map_err(|err| ConfigError::InvalidRegex {
            line: line.to_owned(),
            source: err,
        })?;
        return Ok(ExpectedValue::Pattern(regex));
    }

    let numeric_target = matches!(target, AssertionTarget::Status | AssertionTarget::DurationMs);
    if numeric_target || operator.is_ordering() {
        return literal
            .text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .map(ExpectedValue::Number)
            .ok_or_else(|| ConfigError::ExpectedNumber {
                line: line.to_owned(),
                value: literal.text.clone(),
            });
    }

    if operator.is_textual() || literal.quoted || !matches!(target, AssertionTarget::BodyPath(_)) {
        return Ok(ExpectedValue::Text(literal.text));
    }

    match literal.text.as_str() {
        "true" => return Ok(ExpectedValue::Bool(true)),
        "false" => return Ok(ExpectedValue::Bool(false)),
        _ => {}
    }
    match literal.text.parse::<f64>() {
        Ok(number) if number.is_finite() => Ok(ExpectedValue::Number(number)),
        Ok(_) | Err(_) => Ok(ExpectedValue::Text(literal.text)),
    }
}

/// `/pattern/` or a bare pattern.
fn regex_body(text: &str) -> &str {
    text.strip_prefix('/')
        .and_then(|inner| inner.strip_suffix('/'))
        .unwrap_or(text)
}
