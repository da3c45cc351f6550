//! Compare and batch document loading.
mod convert;
mod loader;
pub mod types;


pub use loader::{load_batch_config, load_compare_config};
