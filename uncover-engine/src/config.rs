//! Run options with sensible defaults.
//!
//! [`ServiceOptions`] selects engines and queries and tunes the shared
//! session: retries, timeout, rate-limit override and channel sizing.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::UncoverError;
use crate::session::SessionOptions;
use crate::types::Query;

/// Options for one orchestrated run.
///
/// Use [`Default::default()`] and override the fields you need.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Engines to query. Every query is sent to every engine.
    pub engines: Vec<String>,
    /// Query texts.
    pub queries: Vec<String>,
    /// Per-query result cap for each agent. `0` means unbounded.
    pub limit: usize,
    /// Retries after the first attempt of each request.
    pub max_retries: u32,
    /// Per-request timeout in seconds; also caps retry backoff.
    pub timeout_seconds: u64,
    /// Global rate-limit override applied to every engine. `0` keeps each
    /// engine's default profile.
    pub rate_limit: u32,
    /// Window for [`rate_limit`](Self::rate_limit).
    pub rate_limit_window: Duration,
    /// First retry delay; doubles on each subsequent retry.
    pub retry_wait_min: Duration,
    /// Capacity of the merged result channel.
    pub channel_buffer: usize,
    /// User-Agent override.
    pub user_agent: Option<String>,
    /// Opaque per-source hints attached to every query.
    pub extensions: BTreeMap<String, String>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            engines: vec!["shodan".into()],
            queries: Vec::new(),
            limit: 100,
            max_retries: 2,
            timeout_seconds: 30,
            rate_limit: 0,
            rate_limit_window: Duration::from_secs(1),
            retry_wait_min: Duration::from_secs(1),
            channel_buffer: 32,
            user_agent: None,
            extensions: BTreeMap::new(),
        }
    }
}

impl ServiceOptions {
    /// Validates these options.
    ///
    /// Checks:
    /// - `engines` must not be empty
    /// - `queries` must not be empty, and no query may be blank
    /// - `timeout_seconds` must be greater than 0
    /// - `channel_buffer` must be greater than 0
    /// - a non-zero `rate_limit` needs a non-zero `rate_limit_window`
    pub fn validate(&self) -> Result<(), UncoverError> {
        if self.engines.is_empty() {
            return Err(UncoverError::NoAgents);
        }
        if self.queries.is_empty() {
            return Err(UncoverError::Config("at least one query is required".into()));
        }
        if self.queries.iter().any(|q| q.trim().is_empty()) {
            return Err(UncoverError::Config("query text must not be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(UncoverError::Config(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        if self.channel_buffer == 0 {
            return Err(UncoverError::Config(
                "channel_buffer must be greater than 0".into(),
            ));
        }
        if self.rate_limit > 0 && self.rate_limit_window.is_zero() {
            return Err(UncoverError::Config(
                "rate_limit_window must be non-zero when rate_limit is set".into(),
            ));
        }
        Ok(())
    }

    /// Session settings derived from these options.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            max_retries: self.max_retries,
            timeout_seconds: self.timeout_seconds,
            rate_limit: self.rate_limit,
            rate_limit_window: self.rate_limit_window,
            retry_wait_min: self.retry_wait_min,
            user_agent: self.user_agent.clone(),
        }
    }

    /// One [`Query`] per query text, carrying the limit and extensions.
    pub fn build_queries(&self) -> Vec<Query> {
        self.queries
            .iter()
            .map(|text| Query {
                text: text.clone(),
                limit: self.limit,
                extensions: self.extensions.clone(),
            })
            .collect()
    }
}
