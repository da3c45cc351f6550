use std::path::Path;

use serde::de::DeserializeOwned;

use crate::compare::CompareSuite;
use crate::error::{AppError, AppResult, ConfigError};
use crate::run::BatchSuite;

use super::convert::{batch_suite_from_document, compare_suite_from_document};
use super::types::{BatchDocument, CompareDocument};

/// Load and validate a compare document. `extra_vars` are layered over the
/// document's vars before every scenario is built against both endpoints.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or when any
/// scenario, URL, header, variable, assertion, or compare rule is invalid.
pub fn load_compare_config(
    path: &Path,
    extra_vars: &[(String, String)],
) -> AppResult<CompareSuite> {
    let document: CompareDocument = load_document(path)?;
    let mut suite = compare_suite_from_document(document)?;
    suite.vars.extend(extra_vars.iter().cloned());
    suite.validate_templates()?;
    tracing::debug!(
        "Loaded compare config '{}': {} scenario(s), mode {}",
        path.display(),
        suite.scenarios.len(),
        suite.strategy
    );
    Ok(suite)
}

/// Load and validate a batch document. `extra_vars` are layered over the
/// document's vars before every test's request is built.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or when any test
/// is invalid. One malformed test fails the whole load.
pub fn load_batch_config(path: &Path, extra_vars: &[(String, String)]) -> AppResult<BatchSuite> {
    let document: BatchDocument = load_document(path)?;
    let mut suite = batch_suite_from_document(document)?;
    suite.vars.extend(extra_vars.iter().cloned());
    suite.validate()?;
    tracing::debug!(
        "Loaded batch config '{}': {} test(s)",
        path.display(),
        suite.tests.len()
    );
    Ok(suite)
}

pub(crate) fn load_document<T>(path: &Path) -> AppResult<T>
where
    T: DeserializeOwned,
{
    let content = std::fs::read_to_string(path).map_err(|err| {
        AppError::config(ConfigError::ReadConfig {
            path: path.to_path_buf(),
            source: err,
        })
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseToml {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some("json") => serde_json::from_str(&content).map_err(|err| {
            AppError::config(ConfigError::ParseJson {
                path: path.to_path_buf(),
                source: err,
            })
        }),
        Some(ext) => Err(AppError::config(ConfigError::UnsupportedExtension {
            ext: ext.to_owned(),
        })),
        None => Err(AppError::config(ConfigError::MissingExtension)),
    }
}
