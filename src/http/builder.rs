use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::header::HeaderValue;
use reqwest::{Body, Request, Url};

use crate::error::{AppError, AppResult, ConfigError};

use super::template::{
    HeaderTemplateValue, RenderContext, RequestTemplate, TemplatePool, render_template,
};
use super::vars::VariableSet;

/// A request ready to dispatch plus the number of body bytes it will send.
#[derive(Debug)]
pub struct BuiltRequest {
    pub request: Request,
    pub write_bytes: u64,
}

/// Turns templates into fresh, independent `reqwest::Request`s.
///
/// Static URLs are resolved once up front; every template is built once at
/// construction so bad URLs and header values surface before any dispatch.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base: Option<Url>,
    vars: Arc<VariableSet>,
    resolved: Vec<Option<Url>>,
}

impl RequestBuilder {
    /// Prepare a builder for `pool`, resolving relative URLs against `base`.
    ///
    /// # Errors
    ///
    /// Returns an error when the base URL is invalid, a variable definition
    /// is malformed, or any template cannot produce a request.
    pub fn new(
        pool: &TemplatePool,
        base: Option<&str>,
        vars: &BTreeMap<String, String>,
    ) -> AppResult<Self> {
        let vars = VariableSet::parse(vars).map_err(AppError::config)?;
        let base = base
            .map(|raw| {
                Url::parse(raw.trim()).map_err(|err| {
                    AppError::config(ConfigError::InvalidUrl {
                        url: raw.to_owned(),
                        source: err,
                    })
                })
            })
            .transpose()?;

        let resolved = pool
            .templates()
            .iter()
            .map(|template| {
                if template.url_has_vars() {
                    Ok(None)
                } else {
                    resolve_url(template.url(), base.as_ref()).map(Some)
                }
            })
            .collect::<AppResult<Vec<_>>>()?;

        let builder = Self {
            base,
            vars: Arc::new(vars),
            resolved,
        };
        for (index, template) in pool.templates().iter().enumerate() {
            builder.render(index, template, 0, true)?;
        }
        Ok(builder)
    }

    #[must_use]
    pub const fn base(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    /// Build a new request for the template at `index` in the pool.
    ///
    /// The body is a new `Body` over the template's shared bytes, or a newly
    /// rendered string when it contains variables.
    ///
    /// # Errors
    ///
    /// Returns an error when a rendered URL or header value is invalid.
    pub fn build(
        &self,
        index: usize,
        template: &RequestTemplate,
        seq: u64,
    ) -> AppResult<BuiltRequest> {
        self.render(index, template, seq, false)
    }

    fn render(
        &self,
        index: usize,
        template: &RequestTemplate,
        seq: u64,
        peek: bool,
    ) -> AppResult<BuiltRequest> {
        let context = RenderContext {
            vars: &self.vars,
            seq,
            now_ms: now_ms(),
            peek,
        };

        let url = match self.resolved.get(index) {
            Some(Some(url)) => url.clone(),
            Some(None) | None => {
                resolve_url(&render_template(template.url(), &context), self.base.as_ref())?
            }
        };

        let mut request = Request::new(template.method().clone(), url);
        let headers = request.headers_mut();
        for header in template.headers() {
            let value = match &header.value {
                HeaderTemplateValue::Static(value) => value.clone(),
                HeaderTemplateValue::Dynamic(raw) => {
                    HeaderValue::from_str(&render_template(raw, &context)).map_err(|_err| {
                        AppError::config(ConfigError::InvalidHeaderValue {
                            header: header.name.to_string(),
                        })
                    })?
                }
            };
            headers.append(header.name.clone(), value);
        }

        let mut write_bytes = 0_u64;
        if let Some(body) = template.body() {
            let fresh = if body.has_vars {
                let raw = String::from_utf8_lossy(&body.bytes);
                Body::from(render_template(&raw, &context))
            } else {
                Body::from(body.bytes.clone())
            };
            write_bytes = fresh
                .as_bytes()
                .map_or(0, |bytes| u64::try_from(bytes.len()).unwrap_or(u64::MAX));
            *request.body_mut() = Some(fresh);
        }

        Ok(BuiltRequest {
            request,
            write_bytes,
        })
    }
}

/// Resolve `raw` as an absolute URL, or append it to `base` when relative.
///
/// `http://host/api` + `/users` gives `http://host/api/users`.
///
/// # Errors
///
/// Returns an error when the URL is invalid, or relative without a base.
pub fn resolve_url(raw: &str, base: Option<&Url>) -> AppResult<Url> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let Some(base) = base else {
                return Err(AppError::config(ConfigError::RelativeUrlWithoutBase {
                    url: raw.to_owned(),
                }));
            };
            let joined = format!(
                "{}/{}",
                base.as_str().trim_end_matches('/'),
                raw.trim_start_matches('/')
            );
            Url::parse(&joined).map_err(|err| {
                AppError::config(ConfigError::JoinUrlFailed {
                    url: raw.to_owned(),
                    source: err,
                })
            })
        }
        Err(err) => Err(AppError::config(ConfigError::InvalidUrl {
            url: raw.to_owned(),
            source: err,
        })),
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
