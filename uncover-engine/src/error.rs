//! Error types for the uncover-engine crate.
//!
//! Errors split into two classes. Construction-time errors (unknown engine,
//! missing rate-limit defaults, no credentials at all) abort a run before any
//! worker starts. Everything else is isolated to a single (query, agent) pair
//! and surfaces as a warning while other pairs keep producing results.
//!
//! No API keys appear in error messages: request URLs are redacted before
//! they are embedded.

/// Errors that can occur while orchestrating asset searches.
#[derive(Debug, thiserror::Error)]
pub enum UncoverError {
    /// An agent's required key(s) are not present in the session keys.
    #[error("empty {engine} keys")]
    MissingCredentials {
        /// Name of the agent that refused to query.
        engine: String,
    },

    /// The registry has no agent for this engine name.
    #[error("unknown engine: {0}")]
    UnknownEngine(String),

    /// The engine has no entry in the default rate-limit table.
    #[error("no default rate limit found for engine {0}")]
    UnknownEngineDefaults(String),

    /// A request was issued for a source the session never registered.
    #[error("unknown rate-limit source: {0}")]
    UnknownSource(String),

    /// The retrying client gave up.
    #[error("giving up after {attempts} attempts: {reason}")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Description of the final failure.
        reason: String,
    },

    /// The final response carried a non-2xx status code.
    #[error("unexpected status code {code} received from {url}")]
    UnexpectedStatus {
        /// HTTP status code.
        code: u16,
        /// Unescaped, key-redacted request URL.
        url: String,
        /// Response body, truncated.
        body: String,
    },

    /// No usable keys anywhere and no anonymous engine selected.
    #[error("engines {0} require keys but no keys were found")]
    NoCredentials(String),

    /// No agent/source was specified.
    #[error("no agent/source specified")]
    NoAgents,

    /// A request could not be built, its body could not be read, or the
    /// upstream API reported a failure in an otherwise successful response.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An upstream response could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error writing to an output sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UncoverError {
    /// Whether this error aborts the whole run rather than a single pair.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UnknownEngine(_)
                | Self::UnknownEngineDefaults(_)
                | Self::UnknownSource(_)
                | Self::NoCredentials(_)
                | Self::NoAgents
                | Self::Config(_)
        )
    }

    /// HTTP status code carried by this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Convenience type alias for uncover-engine results.
pub type Result<T> = std::result::Result<T, UncoverError>;
