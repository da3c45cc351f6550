//! Run statistics: per-endpoint aggregation, latency histograms, and the live
//! sample feed.
mod histogram;
mod sampler;
mod stats;
mod types;


pub use histogram::{LatencyHistogram, LatencySummary};
pub use sampler::{sample_channel, spawn_sampler};
pub use stats::{Counters, EndpointStats, RunStats};
pub use types::{
    CapturedResponse, DispatchOutcome, RunResult, Sample, StatsSnapshot, rate_x100,
};
