//! Error types for the uncover runner.

use uncover_engine::UncoverError;

/// Top-level error type for a command-line run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// Failure reported by the search engine crate.
    #[error(transparent)]
    Engine(#[from] UncoverError),

    /// Configuration file or option error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RunnerError>;
