//! Core library for the `volley` CLI.
//!
//! The crate drives an HTTP service with many concurrent requests and
//! measures what comes back: request templating, the worker pool with its
//! exact request cap, live sampling, latency and error statistics, response
//! assertions, batch runs, and base/target endpoint comparison. The `volley`
//! binary is a thin layer over [`entry::run`]; [`run::run_once`] is the entry
//! point for embedding.
pub mod args;
pub mod assertions;
pub mod compare;
pub mod config;
pub mod entry;
pub mod error;
pub mod http;
pub mod logger;
pub mod metrics;
pub mod report;
pub mod run;
pub mod shutdown;
pub mod shutdown_handlers;
