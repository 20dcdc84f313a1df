//! Fan-out / fan-in over every (query, agent) pair.
//!
//! [`Service::execute`] spawns one worker per pair. Each worker draws its own
//! credential snapshot, runs the agent, and relays results into one bounded
//! merge channel. A supervisor task joins every worker and then drops the last
//! sender, which closes the merged stream.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::agent::{Agent, ResultStream};
use crate::config::ServiceOptions;
use crate::credentials::Provider;
use crate::error::UncoverError;
use crate::registry::AgentRegistry;
use crate::session::Session;
use crate::types::{Query, SearchResult};

/// Orchestrates one set of queries across the selected agents.
pub struct Service {
    options: ServiceOptions,
    agents: Vec<Arc<dyn Agent>>,
    session: Session,
    provider: Arc<Provider>,
    known_engines: Vec<String>,
}

impl Service {
    /// Build a service using the built-in agents.
    ///
    /// # Errors
    ///
    /// Checked in this order:
    ///
    /// - invalid options
    /// - [`UncoverError::NoCredentials`] if no key is configured and no
    ///   selected engine is anonymous
    /// - an unknown engine name
    /// - an engine with no default rate-limit profile
    pub fn new(
        options: ServiceOptions,
        provider: impl Into<Arc<Provider>>,
    ) -> Result<Self, UncoverError> {
        Self::with_registry(options, provider, &AgentRegistry::builtin())
    }

    /// Build a service resolving engines through `registry`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_registry(
        options: ServiceOptions,
        provider: impl Into<Arc<Provider>>,
        registry: &AgentRegistry,
    ) -> Result<Self, UncoverError> {
        options.validate()?;
        let provider = provider.into();
        let any_anonymous = options
            .engines
            .iter()
            .any(|engine| registry.is_anonymous(engine));
        if !provider.has_keys() && !any_anonymous {
            return Err(UncoverError::NoCredentials(format!("{:?}", options.engines)));
        }
        let agents = registry.create_agents(&options.engines)?;
        let session = Session::new(
            provider.get_keys(),
            &options.session_options(),
            &options.engines,
        )?;

        tracing::debug!(
            engines = ?options.engines,
            queries = options.queries.len(),
            limit = options.limit,
            "service ready"
        );

        Ok(Self {
            options,
            agents,
            session,
            provider,
            known_engines: registry.names(),
        })
    }

    /// Every engine name the registry this service was built from knows.
    pub fn all_agents(&self) -> &[String] {
        &self.known_engines
    }

    /// Names of the agents selected for this run, in dispatch order.
    pub fn agent_names(&self) -> Vec<&'static str> {
        self.agents.iter().map(|agent| agent.name()).collect()
    }

    /// The options this service was built with.
    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Dispatch every (query, agent) pair and return the merged stream.
    ///
    /// Results arrive in no particular order across pairs. Each carries the
    /// merge timestamp. Results with `error` set are relayed as-is for the
    /// consumer to report. The stream ends once every worker has finished,
    /// or promptly after `cancel` fires.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`UncoverError::NoAgents`] if no agent is selected.
    pub fn execute(&self, cancel: CancellationToken) -> Result<ResultStream, UncoverError> {
        if self.agents.is_empty() {
            return Err(UncoverError::NoAgents);
        }

        let (tx, rx) = mpsc::channel(self.options.channel_buffer.max(1));
        let mut workers = JoinSet::new();
        for query in self.options.build_queries() {
            for agent in &self.agents {
                workers.spawn(run_pair(
                    Arc::clone(agent),
                    self.session.clone(),
                    Arc::clone(&self.provider),
                    query.clone(),
                    tx.clone(),
                    cancel.clone(),
                ));
            }
        }
        tracing::debug!(pairs = workers.len(), "workers dispatched");

        tokio::spawn(supervise(workers, tx, cancel));
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Run [`execute`](Self::execute) and apply `callback` to every merged
    /// result until the stream ends or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Only the fatal precondition errors of [`execute`](Self::execute).
    pub async fn execute_with_callback<F>(
        &self,
        cancel: CancellationToken,
        mut callback: F,
    ) -> Result<(), UncoverError>
    where
        F: FnMut(SearchResult),
    {
        let mut stream = self.execute(cancel.clone())?;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = stream.next() => match next {
                    Some(result) => callback(result),
                    None => break,
                },
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("agents", &self.agent_names())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Wait for every worker, then drop the last sender to close the stream.
async fn supervise(
    mut workers: JoinSet<()>,
    tx: mpsc::Sender<SearchResult>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                tracing::debug!("run cancelled");
                break;
            }
            joined = workers.join_next() => match joined {
                Some(Err(e)) if e.is_panic() => tracing::error!(error = %e, "worker panicked"),
                Some(_) => {}
                None => break,
            },
        }
    }
    drop(tx);
    tracing::debug!("all workers finished");
}

/// One (query, agent) worker. Failures are logged and end this pair only.
async fn run_pair(
    agent: Arc<dyn Agent>,
    session: Session,
    provider: Arc<Provider>,
    query: Query,
    tx: mpsc::Sender<SearchResult>,
    cancel: CancellationToken,
) {
    let name = agent.name();
    if cancel.is_cancelled() {
        return;
    }

    let keys = provider.get_keys();
    if keys.is_empty() && !agent.is_anonymous() {
        tracing::warn!(source = name, "{name} specified as engine but no keys were found");
        return;
    }
    let session = session.with_keys(keys);

    let started = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        started = agent.query(&session, &query) => started,
    };
    let mut stream = match started {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(source = name, error = %e, "agent query failed");
            return;
        }
    };

    let mut relayed = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        let Some(mut result) = next else { break };
        result.timestamp = chrono::Utc::now().timestamp();

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = tx.send(result) => sent,
        };
        if sent.is_err() {
            break;
        }
        relayed += 1;
    }
    tracing::debug!(source = name, relayed, "agent stream finished");
}
