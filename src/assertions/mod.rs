//! Response assertions: parsed once per template, evaluated against every
//! response the template produces.
mod eval;
mod json_path;
mod parse;

#[cfg(test)]
mod tests;

use std::fmt;

use regex::Regex;

pub use eval::{AssertionFailure, ResponseView, evaluate_all};
pub use json_path::JsonPath;
pub use parse::{parse_assertion, parse_assertion_block, parse_assertion_lines};

/// What part of the response an assertion inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssertionTarget {
    Status,
    DurationMs,
    Body,
    Header(String),
    BodyPath(JsonPath),
}

impl AssertionTarget {
    #[must_use]
    pub const fn reads_body(&self) -> bool {
        matches!(self, AssertionTarget::Body | AssertionTarget::BodyPath(_))
    }
}

impl fmt::Display for AssertionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssertionTarget::Status => write!(f, "status"),
            AssertionTarget::DurationMs => write!(f, "duration_ms"),
            AssertionTarget::Body => write!(f, "body"),
            AssertionTarget::Header(name) => write!(f, "header '{}'", name),
            AssertionTarget::BodyPath(path) => write!(f, "json path '{}'", path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
    Exists,
    NotExists,
}

impl AssertionOperator {
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let operator = match token {
            "==" => AssertionOperator::Eq,
            "!=" => AssertionOperator::Ne,
            ">" => AssertionOperator::Gt,
            ">=" => AssertionOperator::Ge,
            "<" => AssertionOperator::Lt,
            "<=" => AssertionOperator::Le,
            "contains" => AssertionOperator::Contains,
            "not_contains" => AssertionOperator::NotContains,
            "starts_with" => AssertionOperator::StartsWith,
            "ends_with" => AssertionOperator::EndsWith,
            "matches" => AssertionOperator::Matches,
            "exists" => AssertionOperator::Exists,
            "not_exists" => AssertionOperator::NotExists,
            _ => return None,
        };
        Some(operator)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AssertionOperator::Eq => "==",
            AssertionOperator::Ne => "!=",
            AssertionOperator::Gt => ">",
            AssertionOperator::Ge => ">=",
            AssertionOperator::Lt => "<",
            AssertionOperator::Le => "<=",
            AssertionOperator::Contains => "contains",
            AssertionOperator::NotContains => "not_contains",
            AssertionOperator::StartsWith => "starts_with",
            AssertionOperator::EndsWith => "ends_with",
            AssertionOperator::Matches => "matches",
            AssertionOperator::Exists => "exists",
            AssertionOperator::NotExists => "not_exists",
        }
    }

    #[must_use]
    pub const fn takes_value(self) -> bool {
        !matches!(self, AssertionOperator::Exists | AssertionOperator::NotExists)
    }

    /// `>`, `>=`, `<`, `<=`.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(
            self,
            AssertionOperator::Gt
                | AssertionOperator::Ge
                | AssertionOperator::Lt
                | AssertionOperator::Le
        )
    }

    #[must_use]
    pub const fn is_textual(self) -> bool {
        matches!(
            self,
            AssertionOperator::Contains
                | AssertionOperator::NotContains
                | AssertionOperator::StartsWith
                | AssertionOperator::EndsWith
        )
    }
}

impl fmt::Display for AssertionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of an assertion, typed at parse time.
#[derive(Debug, Clone)]
pub enum ExpectedValue {
    None,
    Text(String),
    Number(f64),
    Bool(bool),
    Pattern(Regex),
}

impl fmt::Display for ExpectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedValue::None => Ok(()),
            ExpectedValue::Text(text) => write!(f, "'{}'", text),
            ExpectedValue::Number(number) => write!(f, "{}", number),
            ExpectedValue::Bool(flag) => write!(f, "{}", flag),
            ExpectedValue::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

/// One compiled assertion. Stateless; shared read-only across workers.
#[derive(Debug, Clone)]
pub struct Assertion {
    source: String,
    target: AssertionTarget,
    operator: AssertionOperator,
    expected: ExpectedValue,
}

impl Assertion {
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub const fn target(&self) -> &AssertionTarget {
        &self.target
    }

    #[must_use]
    pub const fn operator(&self) -> AssertionOperator {
        self.operator
    }

    #[must_use]
    pub const fn expected(&self) -> &ExpectedValue {
        &self.expected
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Whether any assertion needs the response body to be captured.
#[must_use]
pub fn needs_body(assertions: &[Assertion]) -> bool {
    assertions
        .iter()
        .any(|assertion| assertion.target.reads_body())
}
