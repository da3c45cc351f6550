//! Request templating, dispatch, and the worker pool.
mod builder;
mod dispatcher;
mod limiter;
mod rate;
mod template;
mod transport;
mod vars;

#[cfg(test)]
mod tests;

pub use builder::{BuiltRequest, RequestBuilder, resolve_url};
pub use dispatcher::{DEFAULT_RUN_DURATION, Dispatcher, RunPlan};
pub use limiter::RequestLimiter;
pub use rate::RateGate;
pub use template::{
    LoadStrategy, RenderContext, RequestTemplate, TemplatePool, parse_method, render_template,
};
pub use transport::{ReqwestTransport, Transport, TransportError, TransportResponse};
pub use vars::{NowFormat, Variable, VariableSet};
