use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use reqwest::Method;
use reqwest::header::{HeaderName, HeaderValue};

use crate::assertions::{Assertion, needs_body};
use crate::error::{AppError, AppResult, ConfigError, ValidationError};

use super::vars::{Variable, VariableSet};

/// Immutable description of one HTTP call. Shared read-only across workers.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    name: String,
    method: Method,
    url: String,
    url_has_vars: bool,
    headers: Vec<TemplateHeader>,
    body: Option<TemplateBody>,
    assertions: Arc<[Assertion]>,
    weight: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct TemplateHeader {
    pub(crate) name: HeaderName,
    pub(crate) value: HeaderTemplateValue,
}

#[derive(Debug, Clone)]
pub(crate) enum HeaderTemplateValue {
    Static(HeaderValue),
    Dynamic(String),
}

/// Request body kept as shared bytes. Each dispatch gets its own cursor over
/// the same buffer, or a freshly rendered copy when the body has variables.
#[derive(Debug, Clone)]
pub(crate) struct TemplateBody {
    pub(crate) bytes: Bytes,
    pub(crate) has_vars: bool,
}

impl RequestTemplate {
    /// Create a template for `method` and `url`. The URL may be relative when
    /// a base endpoint is supplied at build time.
    ///
    /// # Errors
    ///
    /// Returns an error when the method is not a valid HTTP token.
    pub fn new(method: &str, url: impl Into<String>) -> Result<Self, ConfigError> {
        let method = parse_method(method)?;
        let url = url.into();
        Ok(Self {
            name: url.clone(),
            url_has_vars: has_vars(&url),
            method,
            url,
            headers: Vec::new(),
            body: None,
            assertions: Arc::from(Vec::new()),
            weight: 1,
        })
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Add a header. Values containing `{{var}}` are rendered per dispatch.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid header name, or a static value that is
    /// not a valid header value.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let header_name =
            HeaderName::from_str(name.trim()).map_err(|_err| ConfigError::InvalidHeaderName {
                header: name.to_owned(),
            })?;
        let value = value.trim();
        let value = if has_vars(value) {
            HeaderTemplateValue::Dynamic(value.to_owned())
        } else {
            HeaderTemplateValue::Static(HeaderValue::from_str(value).map_err(|_err| {
                ConfigError::InvalidHeaderValue {
                    header: name.to_owned(),
                }
            })?)
        };
        self.headers.push(TemplateHeader {
            name: header_name,
            value,
        });
        Ok(self)
    }

    /// Add every `(name, value)` pair in order.
    ///
    /// # Errors
    ///
    /// Returns the first header that fails validation.
    pub fn with_headers<'pair, I>(self, headers: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'pair str, &'pair str)>,
    {
        headers
            .into_iter()
            .try_fold(self, |template, (name, value)| template.with_header(name, value))
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() {
            None
        } else {
            Some(TemplateBody {
                has_vars: has_vars(&body),
                bytes: Bytes::from(body),
            })
        };
        self
    }

    #[must_use]
    pub fn with_assertions(mut self, assertions: Vec<Assertion>) -> Self {
        self.assertions = Arc::from(assertions);
        self
    }

    /// Selection weight for the weighted load strategy. Must be >= 1.
    #[must_use]
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    #[must_use]
    pub const fn weight(&self) -> u32 {
        self.weight
    }

    /// Size of the stored body in bytes (before variable rendering).
    #[must_use]
    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, |body| body.bytes.len())
    }

    #[must_use]
    pub fn needs_body(&self) -> bool {
        needs_body(&self.assertions)
    }

    pub(crate) const fn url_has_vars(&self) -> bool {
        self.url_has_vars
    }

    pub(crate) fn headers(&self) -> &[TemplateHeader] {
        &self.headers
    }

    pub(crate) const fn body(&self) -> Option<&TemplateBody> {
        self.body.as_ref()
    }
}

/// Parse an HTTP method, accepting any case.
///
/// # Errors
///
/// Returns an error when the method is empty or not a valid token.
pub fn parse_method(method: &str) -> Result<Method, ConfigError> {
    let upper = method.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Err(ConfigError::InvalidMethod {
            method: method.to_owned(),
        });
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_err| ConfigError::InvalidMethod {
        method: method.to_owned(),
    })
}

/// How workers pick the next template from a pool of several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

impl LoadStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LoadStrategy::RoundRobin => "round-robin",
            LoadStrategy::Random => "random",
            LoadStrategy::Weighted => "weighted",
        }
    }
}

impl fmt::Display for LoadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadStrategy {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "round-robin" | "round_robin" | "roundrobin" => Ok(LoadStrategy::RoundRobin),
            "random" => Ok(LoadStrategy::Random),
            "weighted" => Ok(LoadStrategy::Weighted),
            _ => Err(ValidationError::InvalidLoadStrategy {
                value: value.to_owned(),
            }),
        }
    }
}

/// Ordered set of templates plus the selection strategy.
#[derive(Debug)]
pub struct TemplatePool {
    templates: Vec<Arc<RequestTemplate>>,
    strategy: LoadStrategy,
    cursor: AtomicUsize,
    weights: Option<WeightedIndex<u32>>,
}

impl TemplatePool {
    /// Build a pool from one or more templates.
    ///
    /// # Errors
    ///
    /// Returns an error when the pool is empty, or when the weighted strategy
    /// cannot build its distribution.
    pub fn new(templates: Vec<RequestTemplate>, strategy: LoadStrategy) -> AppResult<Self> {
        if templates.is_empty() {
            return Err(AppError::config(ConfigError::EmptyTemplatePool));
        }
        if let Some(index) = templates.iter().position(|template| template.weight == 0) {
            return Err(AppError::config(ConfigError::TemplateWeightZero { index }));
        }
        let weights = if strategy == LoadStrategy::Weighted && templates.len() > 1 {
            let index = WeightedIndex::new(templates.iter().map(RequestTemplate::weight))
                .map_err(|err| AppError::config(ConfigError::WeightedSelection { source: err }))?;
            Some(index)
        } else {
            None
        };
        Ok(Self {
            templates: templates.into_iter().map(Arc::new).collect(),
            strategy,
            cursor: AtomicUsize::new(0),
            weights,
        })
    }

    /// A pool with a single template.
    ///
    /// # Errors
    ///
    /// Never fails for a single template; kept fallible to share [`TemplatePool::new`].
    pub fn single(template: RequestTemplate) -> AppResult<Self> {
        Self::new(vec![template], LoadStrategy::RoundRobin)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    #[must_use]
    pub const fn strategy(&self) -> LoadStrategy {
        self.strategy
    }

    #[must_use]
    pub fn templates(&self) -> &[Arc<RequestTemplate>] {
        &self.templates
    }

    /// Pick the next template according to the pool strategy.
    #[must_use]
    pub fn select(&self) -> Option<(usize, &Arc<RequestTemplate>)> {
        let len = self.templates.len();
        let index = if len <= 1 {
            0
        } else {
            match self.strategy {
                LoadStrategy::RoundRobin => self
                    .cursor
                    .fetch_add(1, Ordering::Relaxed)
                    .checked_rem(len)
                    .unwrap_or(0),
                LoadStrategy::Random => rand::thread_rng().gen_range(0..len),
                LoadStrategy::Weighted => self
                    .weights
                    .as_ref()
                    .map_or(0, |weights| weights.sample(&mut rand::thread_rng())),
            }
        };
        self.templates.get(index).map(|template| (index, template))
    }
}

pub(crate) fn has_vars(input: &str) -> bool {
    input.contains("{{")
}

/// Variables available to `{{name}}` placeholders for one dispatch.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'vars> {
    pub vars: &'vars VariableSet,
    pub seq: u64,
    pub now_ms: u128,
    /// Render without advancing generators such as sequences.
    pub peek: bool,
}

impl RenderContext<'_> {
    fn resolve(&self, key: &str) -> Option<String> {
        match key {
            "seq" => Some(self.seq.to_string()),
            "timestamp_ms" => Some(self.now_ms.to_string()),
            "timestamp_s" => Some(self.now_ms.checked_div(1000).unwrap_or(0).to_string()),
            other => self.vars.get(other).map(|variable| {
                if self.peek {
                    variable.peek()
                } else {
                    variable.value()
                }
            }),
        }
    }
}

/// Substitute `{{name}}` placeholders. Unknown names are left as written.
pub fn render_template(input: &str, context: &RenderContext<'_>) -> String {
    let mut rest = input;
    let mut output = String::with_capacity(input.len());

    loop {
        let Some(start) = rest.find("{{") else {
            output.push_str(rest);
            break;
        };
        let (before, after_start) = rest.split_at(start);
        output.push_str(before);
        let Some(after) = after_start.strip_prefix("{{") else {
            output.push_str(after_start);
            break;
        };
        let Some(end) = after.find("}}") else {
            output.push_str("{{");
            output.push_str(after);
            break;
        };
        let (key_part, after_end) = after.split_at(end);
        let key = key_part.trim();
        if let Some(value) = context.resolve(key) {
            output.push_str(&value);
        } else {
            output.push_str("{{");
            output.push_str(key_part);
            output.push_str("}}");
        }
        rest = match after_end.strip_prefix("}}") {
            Some(remaining) => remaining,
            None => {
                output.push_str(after_end);
                break;
            }
        };
    }

    output
}
