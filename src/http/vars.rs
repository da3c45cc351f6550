use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::format::{Item, StrftimeItems};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::error::ConfigError;

const DEFAULT_RANDOM_RANGE: (i64, i64) = (1, 1000);

/// A user variable: a fixed value, or a generator producing a fresh value on
/// every render.
///
/// Definitions use `type:params`:
/// - `random:min-max` (or `random:max`, or `random` for 1-1000), inclusive
/// - `uuid`
/// - `sequence:start` counting up from `start` (default 1)
/// - `choice:a,b,c`
/// - `now:format` / `timestamp:format` with `unix`, `unix_ms`, `unix_ns`,
///   `rfc3339`, `iso8601`, `date`, `time`, or a strftime pattern
///
/// Anything else is a fixed value.
#[derive(Debug, Clone)]
pub enum Variable {
    Fixed(String),
    Random { min: i64, max: i64 },
    Uuid,
    Sequence(Arc<AtomicI64>),
    Choice(Vec<String>),
    Now(NowFormat),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NowFormat {
    Unix,
    UnixMs,
    UnixNs,
    Rfc3339,
    Date,
    Time,
    Pattern(String),
}

impl Variable {
    /// Parse one `--var` value.
    ///
    /// # Errors
    ///
    /// Returns an error when a generator's parameters are invalid.
    pub fn parse(name: &str, definition: &str) -> Result<Self, ConfigError> {
        let (kind, params) = match definition.split_once(':') {
            Some((kind, params)) => (kind.trim(), Some(params.trim())),
            None => (definition.trim(), None),
        };
        let invalid = |reason: &str| ConfigError::InvalidVariable {
            name: name.to_owned(),
            definition: definition.to_owned(),
            reason: reason.to_owned(),
        };

        match kind {
            "random" => {
                let (min, max) = match params.filter(|params| !params.is_empty()) {
                    None => DEFAULT_RANDOM_RANGE,
                    Some(params) => parse_range(params).ok_or_else(|| {
                        invalid("expected 'random:min-max' or 'random:max'")
                    })?,
                };
                if min >= max {
                    return Err(invalid("min must be less than max"));
                }
                Ok(Variable::Random { min, max })
            }
            "uuid" if params.is_none_or(str::is_empty) => Ok(Variable::Uuid),
            "sequence" => {
                let start = match params.filter(|params| !params.is_empty()) {
                    None => 1,
                    Some(params) => params
                        .parse::<i64>()
                        .map_err(|_err| invalid("sequence start must be an integer"))?,
                };
                Ok(Variable::Sequence(Arc::new(AtomicI64::new(start))))
            }
            "choice" => {
                let options: Vec<String> = params
                    .unwrap_or_default()
                    .split(',')
                    .map(str::trim)
                    .filter(|option| !option.is_empty())
                    .map(str::to_owned)
                    .collect();
                if options.is_empty() {
                    return Err(invalid("choice needs at least one option"));
                }
                Ok(Variable::Choice(options))
            }
            "now" | "timestamp" => {
                let format = match params.unwrap_or_default() {
                    "" | "unix" => NowFormat::Unix,
                    "unix_ms" => NowFormat::UnixMs,
                    "unix_ns" => NowFormat::UnixNs,
                    "rfc3339" | "iso8601" => NowFormat::Rfc3339,
                    "date" => NowFormat::Date,
                    "time" => NowFormat::Time,
                    pattern => {
                        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                            return Err(invalid("unknown time format"));
                        }
                        NowFormat::Pattern(pattern.to_owned())
                    }
                };
                Ok(Variable::Now(format))
            }
            _ => Ok(Variable::Fixed(definition.to_owned())),
        }
    }

    /// Produce the value for one render.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Variable::Fixed(value) => value.clone(),
            Variable::Random { min, max } => rand::thread_rng().gen_range(*min..=*max).to_string(),
            Variable::Uuid => Uuid::new_v4().to_string(),
            Variable::Sequence(counter) => counter.fetch_add(1, Ordering::Relaxed).to_string(),
            Variable::Choice(options) => {
                let index = rand::thread_rng().gen_range(0..options.len());
                options.get(index).cloned().unwrap_or_default()
            }
            Variable::Now(format) => render_now(format),
        }
    }

    /// A representative value that leaves generator state untouched.
    #[must_use]
    pub fn peek(&self) -> String {
        match self {
            Variable::Sequence(counter) => counter.load(Ordering::Relaxed).to_string(),
            Variable::Fixed(_)
            | Variable::Random { .. }
            | Variable::Uuid
            | Variable::Choice(_)
            | Variable::Now(_) => self.value(),
        }
    }
}

fn parse_range(params: &str) -> Option<(i64, i64)> {
    match params.split_once('-') {
        Some((min, max)) => Some((min.trim().parse().ok()?, max.trim().parse().ok()?)),
        None => Some((0, params.parse().ok()?)),
    }
}

fn render_now(format: &NowFormat) -> String {
    let now = Utc::now();
    match format {
        NowFormat::Unix => now.timestamp().to_string(),
        NowFormat::UnixMs => now.timestamp_millis().to_string(),
        NowFormat::UnixNs => now
            .timestamp_nanos_opt()
            .map_or_else(|| now.timestamp_millis().to_string(), |nanos| nanos.to_string()),
        NowFormat::Rfc3339 => now.to_rfc3339_opts(SecondsFormat::Secs, true),
        NowFormat::Date => now.format("%Y-%m-%d").to_string(),
        NowFormat::Time => now.format("%H:%M:%S").to_string(),
        NowFormat::Pattern(pattern) => {
            let mut rendered = String::new();
            if write!(rendered, "{}", now.format(pattern)).is_err() {
                return pattern.clone();
            }
            rendered
        }
    }
}

/// Named variables for one run. Generator state such as sequence counters is
/// shared by every worker of the run.
#[derive(Debug, Clone, Default)]
pub struct VariableSet {
    vars: BTreeMap<String, Variable>,
}

impl VariableSet {
    /// Parse every `name => definition` pair.
    ///
    /// # Errors
    ///
    /// Returns the first invalid generator definition.
    pub fn parse(definitions: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let vars = definitions
            .iter()
            .map(|(name, definition)| {
                Variable::parse(name, definition).map(|variable| (name.clone(), variable))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self { vars })
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.vars.get(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
