//! Trait definition for pluggable source agents.
//!
//! Each external engine (Shodan, Fofa, InternetDB, ...) implements [`Agent`]
//! to turn one [`Query`] into a lazily produced stream of normalised
//! [`SearchResult`] values.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::UncoverError;
use crate::session::Session;
use crate::types::{Query, SearchResult};

/// A finite, non-restartable stream of results from one agent.
pub type ResultStream = Pin<Box<dyn Stream<Item = SearchResult> + Send>>;

/// A pluggable source backend.
///
/// Implementors handle their own:
///
/// - credential validation against [`Session::keys`]
/// - URL construction and paging
/// - response decoding into [`SearchResult`]
///
/// Every outbound request must go through [`Session::send`] or
/// [`Session::execute`] so pacing and retries stay centrally enforced.
/// All implementations must be `Send + Sync` for concurrent dispatch.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable lowercase identifier, used as the rate-limiter key and as
    /// [`SearchResult::source`].
    fn name(&self) -> &'static str;

    /// Whether this agent can query without any credentials.
    fn is_anonymous(&self) -> bool {
        false
    }

    /// Start a query and return its result stream.
    ///
    /// The stream is populated by a background task and closes when the
    /// upstream pages are exhausted, the query limit is reached, or a fatal
    /// error occurs (in which case one result with `error` set is pushed
    /// first).
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::MissingCredentials`] before any network I/O if
    /// the session lacks this agent's keys.
    async fn query(&self, session: &Session, query: &Query) -> Result<ResultStream, UncoverError>;
}
