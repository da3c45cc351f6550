use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::http::LoadStrategy;

use super::parsers::{
    parse_duration_arg, parse_header, parse_load_strategy, parse_positive_u64,
    parse_positive_usize, parse_var,
};
use super::types::{HttpMethod, OutputFormat, PositiveU64, PositiveUsize};

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Concurrent HTTP load tester in Rust - exact request caps, live sampling, response assertions, batch runs, and base/target endpoint comparison."
)]
pub struct TesterArgs {
    /// Target URL (omit when using --urls-file, --batch-config, or --compare-config)
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    /// Number of concurrent workers
    #[arg(
        long,
        short = 'c',
        default_value = "10",
        value_parser = parse_positive_usize
    )]
    pub concurrency: PositiveUsize,

    /// Duration of the run (supports ms/s/m/h); defaults to 10s unless -n is set
    #[arg(long, short = 'd', value_parser = parse_duration_arg)]
    pub duration: Option<Duration>,

    /// Total number of requests to issue
    #[arg(long = "requests", short = 'n', value_parser = parse_positive_u64)]
    pub requests: Option<PositiveU64>,

    /// Requests per second across all workers (unlimited when omitted)
    #[arg(long, short = 'R', value_parser = parse_positive_u64)]
    pub rate: Option<PositiveU64>,

    /// HTTP method to use
    #[arg(long, short = 'X', default_value = "get", ignore_case = true)]
    pub method: HttpMethod,

    /// HTTP headers in 'Key: Value' format (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body data
    #[arg(long, default_value = "")]
    pub data: String,

    /// Content-Type header for the request body (ignored when -H sets one)
    #[arg(long = "content-type")]
    pub content_type: Option<String>,

    /// Response assertion, e.g. 'status == 200' or 'json:user.id exists' (repeatable)
    #[arg(long = "assert")]
    pub asserts: Vec<String>,

    /// Template variable 'name=value'; the value may be a generator such as
    /// 'random:1-100', 'uuid', 'sequence:1', 'choice:a,b', or 'now:rfc3339'
    /// (repeatable)
    #[arg(long = "var", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// File with one URL per line; '#' starts a comment
    #[arg(long = "urls-file")]
    pub urls_file: Option<PathBuf>,

    /// How to pick among several URLs (round-robin, random, weighted)
    #[arg(long = "load-strategy", default_value = "round-robin", value_parser = parse_load_strategy)]
    pub load_strategy: LoadStrategy,

    /// Per-request timeout (supports ms/s/m/h)
    #[arg(long, default_value = "30s", value_parser = parse_duration_arg)]
    pub timeout: Duration,

    /// Run the tests listed in a batch config file (.toml or .json)
    #[arg(long = "batch-config")]
    pub batch_config: Option<PathBuf>,

    /// Number of batch tests to run at the same time
    #[arg(long = "batch-concurrency", default_value = "3", value_parser = parse_positive_usize)]
    pub batch_concurrency: PositiveUsize,

    /// Run batch tests one after another
    #[arg(long = "batch-sequential")]
    pub batch_sequential: bool,

    /// Compare a base and a target endpoint using a compare config file (.toml or .json)
    #[arg(long = "compare-config")]
    pub compare_config: Option<PathBuf>,

    /// Repeat the run on this interval (supports ms/s/m/h)
    #[arg(long, value_parser = parse_duration_arg)]
    pub every: Option<Duration>,

    /// Stop repeating after this many runs
    #[arg(long = "max-runs", value_parser = parse_positive_u64)]
    pub max_runs: Option<PositiveU64>,

    /// Report format
    #[arg(long = "output-format", default_value = "text", env = "VOLLEY_OUTPUT_FORMAT")]
    pub output_format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,

    /// Disable ANSI colors in log output
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Interval between live samples (supports ms/s/m/h)
    #[arg(long = "sample-interval", default_value = "1s", value_parser = parse_duration_arg)]
    pub sample_interval: Duration,
}
