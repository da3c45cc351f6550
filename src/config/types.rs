use std::collections::BTreeMap;

use serde::Deserialize;

/// A duration written either as whole seconds or as text like `"500ms"`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

/// Assertion or rule lines, written as a list or as one multi-line string.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum LineList {
    Lines(Vec<String>),
    Block(String),
}

impl LineList {
    #[must_use]
    pub fn lines(&self) -> Vec<&str> {
        match self {
            LineList::Lines(lines) => lines.iter().map(String::as_str).collect(),
            LineList::Block(block) => block.lines().collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CompareDocument {
    pub base: Option<String>,
    pub target: Option<String>,
    pub mode: Option<String>,
    pub group_field: Option<String>,
    pub concurrency: Option<usize>,
    pub requests: Option<u64>,
    pub duration: Option<DurationValue>,
    pub timeout: Option<DurationValue>,
    /// Requests per second for every scenario run.
    pub rate: Option<u64>,
    pub compare: Option<LineList>,
    pub vars: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioDocument>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScenarioDocument {
    pub name: Option<String>,
    pub method: Option<String>,
    pub url: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    pub asserts: Option<LineList>,
    pub fields: Option<BTreeMap<String, String>>,
    /// `base`, `target`, or `both` (the default).
    pub side: Option<String>,
    /// Target scenario names compared against this one under `one_to_many`.
    pub targets: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchDocument {
    pub vars: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub tests: Vec<BatchTestDocument>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BatchTestDocument {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<String>,
    pub concurrency: Option<usize>,
    pub duration: Option<DurationValue>,
    pub requests: Option<u64>,
    pub timeout: Option<DurationValue>,
    pub rate: Option<u64>,
    pub asserts: Option<LineList>,
}
