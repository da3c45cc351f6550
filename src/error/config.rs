use std::path::PathBuf;

use thiserror::Error;

use super::ValidationError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config '{path}': {source}")]
    ParseToml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to parse JSON config '{path}': {source}")]
    ParseJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unsupported config extension '{ext}'. Use .toml or .json.")]
    UnsupportedExtension { ext: String },
    #[error("Config file must have .toml or .json extension.")]
    MissingExtension,
    #[error("Invalid duration '{value}': {source}")]
    InvalidDuration {
        value: String,
        #[source]
        source: ValidationError,
    },
    #[error("Invalid HTTP method '{method}'.")]
    InvalidMethod { method: String },
    #[error("Invalid header name '{header}'.")]
    InvalidHeaderName { header: String },
    #[error("Invalid value for header '{header}'.")]
    InvalidHeaderValue { header: String },
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Failed to join URL '{url}': {source}")]
    JoinUrlFailed {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Relative URL '{url}' requires a base endpoint.")]
    RelativeUrlWithoutBase { url: String },
    #[error("Failed to build weighted template selection: {source}")]
    WeightedSelection {
        #[source]
        source: rand::distributions::WeightedError,
    },
    #[error("Variable '{name}' has an invalid definition '{definition}': {reason}")]
    InvalidVariable {
        name: String,
        definition: String,
        reason: String,
    },
    #[error("Template pool must contain at least one request.")]
    EmptyTemplatePool,
    #[error("Template {index} must have a weight >= 1.")]
    TemplateWeightZero { index: usize },
    #[error("Assertion '{line}' is missing an operator.")]
    AssertionMissingOperator { line: String },
    #[error("Assertion '{line}' has an unsupported target.")]
    UnknownAssertionTarget { line: String },
    #[error("Assertion '{line}' uses unsupported operator '{operator}'.")]
    UnknownAssertionOperator { line: String, operator: String },
    #[error("Assertion '{line}' has an unterminated quoted string.")]
    UnterminatedQuote { line: String },
    #[error("Assertion '{line}': operator '{operator}' requires a value.")]
    AssertionMissingValue { line: String, operator: String },
    #[error("Assertion '{line}': operator '{operator}' does not take a value.")]
    AssertionUnexpectedValue { line: String, operator: String },
    #[error("Assertion '{line}': 'matches' is only valid for body-path targets, not {target}.")]
    MatchesRequiresBodyPath { line: String, target: String },
    #[error("Assertion '{line}': operator '{operator}' is not supported for {target}.")]
    OperatorNotSupported {
        line: String,
        operator: String,
        target: String,
    },
    #[error("Assertion '{line}': expected a number, got '{value}'.")]
    ExpectedNumber { line: String, value: String },
    #[error("Assertion '{line}' has an invalid regex: {source}")]
    InvalidRegex {
        line: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid compare rule '{line}'.")]
    InvalidCompareRule { line: String },
    #[error("Compare config must set the '{side}' endpoint.")]
    CompareMissingEndpoint { side: &'static str },
    #[error("Compare config must include at least one scenario.")]
    CompareNoScenarios,
    #[error("No compare scenario runs against the {side} endpoint.")]
    CompareSideEmpty { side: &'static str },
    #[error("Unsupported scenario side '{side}'. Use base, target, or both.")]
    UnknownScenarioSide { side: String },
    #[error("Scenario '{scenario}' lists target '{target}', which is not a target-side scenario.")]
    UnknownCompareTarget { scenario: String, target: String },
    #[error("Unsupported pairing mode '{mode}'. Use one_to_many, pair_by_index, or group_by_field.")]
    UnknownPairingMode { mode: String },
    #[error("Pairing mode group_by_field requires 'group_field'.")]
    GroupFieldRequired,
    #[error("Scenario {index} must have a name.")]
    ScenarioMissingName { index: usize },
    #[error("Batch config must include at least one test.")]
    BatchNoTests,
    #[error("Batch test '{name}' must set a url.")]
    BatchTestMissingUrl { name: String },
    #[error("Config '{field}' must be >= 1.")]
    FieldMustBePositive { field: String },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
