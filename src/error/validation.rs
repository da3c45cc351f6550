use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid header format: '{value}'. Expected 'Key: Value'")]
    InvalidHeaderFormat { value: String },
    #[error("Invalid variable '{value}'. Expected 'name=value'")]
    InvalidVarFormat { value: String },
    #[error("Duration must not be empty.")]
    DurationEmpty,
    #[error("Invalid duration '{value}'.")]
    InvalidDurationFormat { value: String },
    #[error("Invalid duration '{value}': {source}")]
    InvalidDurationNumber {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Duration overflow.")]
    DurationOverflow,
    #[error("Invalid duration unit '{unit}'.")]
    InvalidDurationUnit { unit: String },
    #[error("Duration must be > 0.")]
    DurationZero,
    #[error("Value must be >= {min}.")]
    ValueTooSmall { min: u64 },
    #[error("Invalid value: {source}")]
    InvalidNumber {
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("Missing URL (pass a URL, --urls-file, --batch-config, or --compare-config).")]
    MissingUrl,
    #[error("Cannot combine {left} with {right}.")]
    ModeConflict {
        left: &'static str,
        right: &'static str,
    },
    #[error("--max-runs requires --every.")]
    MaxRunsRequiresEvery,
    #[error("Failed to read URL list '{path}': {source}")]
    ReadUrlsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("URL list '{path}' was empty.")]
    UrlsFileEmpty { path: PathBuf },
    #[error("Invalid load strategy '{value}'. Use round-robin, random, or weighted.")]
    InvalidLoadStrategy { value: String },
    #[error("Run finished with failed requests or comparisons.")]
    RunFailed,
    #[error("Failed to build runtime: {source}")]
    RuntimeBuildFailed {
        #[source]
        source: std::io::Error,
    },
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
