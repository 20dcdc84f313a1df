//! # uncover-engine
//!
//! Concurrent multi-source asset search.
//!
//! Queries are fanned out to every selected source agent (Shodan, Fofa,
//! InternetDB, ...), each agent's paginated results are streamed back, and
//! the streams are merged into one. An [`OutputWriter`] suppresses recently
//! seen duplicates and writes each distinct record to every sink.
//!
//! ## Design
//!
//! - One worker task per (query, agent) pair, merged through a bounded channel
//! - One shared [`Session`] per run: per-source rate limiting, retries with
//!   capped exponential backoff, no connection reuse
//! - API keys drawn at random per worker from a [`Provider`] pool
//! - A failing pair is logged and dropped; the run continues
//!
//! ## Security
//!
//! - Credential query parameters are redacted from every URL that appears in
//!   an error or log line
//! - Query text is logged only at trace level

pub mod agent;
pub mod agents;
pub mod config;
pub mod credentials;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod rate_limit;
pub mod registry;
pub mod session;
pub mod types;

pub use agent::{Agent, ResultStream};
pub use config::ServiceOptions;
pub use credentials::{KeyPools, Keys, Provider};
pub use error::{Result, UncoverError};
pub use orchestrator::Service;
pub use output::{MemorySink, OutputWriter};
pub use registry::{fold_engine_queries, AgentRegistry};
pub use session::{Session, SessionOptions};
pub use types::{Query, SearchResult};

pub use tokio_util::sync::CancellationToken;

/// Build a [`Service`] with the built-in agents and start it.
///
/// # Errors
///
/// Any fatal construction or precondition error: invalid options, an
/// unknown engine, or no credentials for keyed-only engines.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> uncover_engine::Result<()> {
/// use futures::StreamExt;
/// use uncover_engine::{CancellationToken, KeyPools, Provider, ServiceOptions};
///
/// let options = ServiceOptions {
///     engines: vec!["shodan-idb".into()],
///     queries: vec!["1.1.1.1".into()],
///     ..Default::default()
/// };
/// let provider = Provider::new(KeyPools::default());
/// let mut results = uncover_engine::execute(options, provider, CancellationToken::new())?;
/// while let Some(result) = results.next().await {
///     println!("{}", result.ip_port());
/// }
/// # Ok(())
/// # }
/// ```
pub fn execute(
    options: ServiceOptions,
    provider: Provider,
    cancel: CancellationToken,
) -> Result<ResultStream> {
    Service::new(options, provider)?.execute(cancel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_validates_options() {
        let options = ServiceOptions {
            queries: vec![],
            ..Default::default()
        };
        let err = execute(options, Provider::default(), CancellationToken::new())
            .err()
            .expect("no queries");
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn execute_rejects_unknown_engine() {
        let options = ServiceOptions {
            engines: vec!["censys".into()],
            queries: vec!["q".into()],
            ..Default::default()
        };
        let provider = Provider::new(KeyPools {
            censys: vec!["token".into()],
            ..Default::default()
        });
        let err = execute(options, provider, CancellationToken::new())
            .err()
            .expect("unregistered engine");
        assert!(matches!(err, UncoverError::UnknownEngine(ref name) if name == "censys"));
    }

    #[tokio::test]
    async fn execute_without_keys_fails_for_keyed_engines() {
        let options = ServiceOptions {
            engines: vec!["shodan".into(), "fofa".into()],
            queries: vec!["port:22".into()],
            ..Default::default()
        };
        let err = execute(options, Provider::default(), CancellationToken::new())
            .err()
            .expect("no keys");
        assert!(matches!(err, UncoverError::NoCredentials(_)));
    }
}
