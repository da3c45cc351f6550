//! CLI argument types and parsing helpers.
mod cli;
pub(crate) mod parsers;
mod types;


pub use cli::TesterArgs;
pub use parsers::parse_duration_arg;
pub use types::{HttpMethod, OutputFormat, PositiveU64, PositiveUsize};
