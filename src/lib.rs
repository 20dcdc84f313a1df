//! uncover: discover exposed hosts through multiple internet search engines.
//!
//! The search core lives in [`uncover_engine`]. This crate adds the
//! application layer:
//! - **Configuration**: TOML run options and API key pools, plus keys from
//!   the environment
//! - **Runner**: drives one orchestrated run and renders each result as JSON,
//!   raw upstream data, or a field template
//! - **Binary**: the `uncover` command line

pub mod config;
pub mod error;
pub mod runner;

pub use config::{OutputMode, SearchConfig, UncoverConfig};
pub use error::{Result, RunnerError};
pub use runner::{RunSummary, Runner, format_fields};
