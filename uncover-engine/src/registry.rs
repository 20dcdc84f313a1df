//! Engine-name to agent-constructor registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::agent::Agent;
use crate::agents::{FofaAgent, ShodanAgent, ShodanIdbAgent};
use crate::error::UncoverError;

/// Builds a fresh agent instance.
pub type AgentConstructor = Arc<dyn Fn() -> Arc<dyn Agent> + Send + Sync>;

/// Registry of agent constructors keyed by engine name.
#[derive(Clone)]
pub struct AgentRegistry {
    constructors: BTreeMap<String, AgentConstructor>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry holding every built-in agent.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("shodan", || Arc::new(ShodanAgent::new()) as Arc<dyn Agent>);
        registry.register("shodan-idb", || Arc::new(ShodanIdbAgent::new()) as Arc<dyn Agent>);
        registry.register("fofa", || Arc::new(FofaAgent::new()) as Arc<dyn Agent>);
        registry
    }

    /// Register (or replace) the constructor for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Arc<dyn Agent> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.constructors.insert(name.clone(), Arc::new(constructor)).is_some() {
            tracing::debug!(engine = %name, "agent constructor replaced");
        }
    }

    /// Whether `name` has a registered constructor.
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered engine names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Whether the agent registered under `name` runs without credentials.
    /// Unknown names are not anonymous.
    pub fn is_anonymous(&self, name: &str) -> bool {
        self.constructors
            .get(name)
            .is_some_and(|constructor| constructor().is_anonymous())
    }

    /// Instantiate the agent registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::UnknownEngine`] for an unregistered name.
    pub fn create_agent(&self, name: &str) -> Result<Arc<dyn Agent>, UncoverError> {
        self.constructors
            .get(name)
            .map(|constructor| constructor())
            .ok_or_else(|| UncoverError::UnknownEngine(name.to_owned()))
    }

    /// Instantiate one agent per name, in order.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown name.
    pub fn create_agents<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<Arc<dyn Agent>>, UncoverError> {
        names
            .iter()
            .map(|name| self.create_agent(name.as_ref()))
            .collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

/// Fold per-engine query lists into the global engine and query lists.
///
/// Every engine with a non-empty per-engine list is added to `engines`
/// (once) and its queries appended to `queries`. Per-engine queries are
/// broadcast to all selected engines like any other query.
pub fn fold_engine_queries(
    engines: &[String],
    queries: &[String],
    per_engine: &BTreeMap<String, Vec<String>>,
) -> (Vec<String>, Vec<String>) {
    let mut all_engines: Vec<String> = Vec::with_capacity(engines.len());
    for engine in engines {
        if !all_engines.contains(engine) {
            all_engines.push(engine.clone());
        }
    }
    let mut all_queries = queries.to_vec();

    for (engine, engine_queries) in per_engine {
        if engine_queries.is_empty() {
            continue;
        }
        if !all_engines.contains(engine) {
            all_engines.push(engine.clone());
        }
        all_queries.extend(engine_queries.iter().cloned());
    }
    (all_engines, all_queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_names_sorted() {
        assert_eq!(AgentRegistry::builtin().names(), vec!["fofa", "shodan", "shodan-idb"]);
    }

    #[test]
    fn create_known_agent() {
        let agent = AgentRegistry::default().create_agent("shodan-idb").expect("agent");
        assert_eq!(agent.name(), "shodan-idb");
        assert!(agent.is_anonymous());
    }

    #[test]
    fn anonymity_by_name() {
        let registry = AgentRegistry::builtin();
        assert!(registry.is_anonymous("shodan-idb"));
        assert!(!registry.is_anonymous("shodan"));
        assert!(!registry.is_anonymous("bing"));
    }

    #[test]
    fn unknown_engine_is_rejected() {
        let err = AgentRegistry::default()
            .create_agents(&["shodan", "altavista"])
            .err()
            .expect("unknown");
        assert_eq!(err.to_string(), "unknown engine: altavista");
        assert!(err.is_fatal());
    }

    #[test]
    fn register_custom_constructor() {
        let mut registry = AgentRegistry::new();
        assert!(!registry.contains("shodan"));
        registry.register("shodan", || {
            Arc::new(ShodanAgent::with_base_url("http://127.0.0.1:9")) as Arc<dyn Agent>
        });
        assert!(registry.contains("shodan"));
        assert_eq!(registry.create_agents(&["shodan"]).expect("agents").len(), 1);
    }

    #[test]
    fn fold_adds_engines_and_queries() {
        let mut per_engine = BTreeMap::new();
        per_engine.insert("fofa".to_owned(), vec!["app=nginx".to_owned()]);
        per_engine.insert("shodan".to_owned(), vec!["port:22".to_owned()]);
        per_engine.insert("censys".to_owned(), Vec::new());

        let (engines, queries) = fold_engine_queries(
            &["shodan".to_owned()],
            &["ssl:example.com".to_owned()],
            &per_engine,
        );

        assert_eq!(engines, vec!["shodan", "fofa"]);
        assert_eq!(queries, vec!["ssl:example.com", "app=nginx", "port:22"]);
    }

    #[test]
    fn fold_dedupes_engines() {
        let (engines, queries) = fold_engine_queries(
            &["shodan".to_owned(), "shodan".to_owned()],
            &["q".to_owned()],
            &BTreeMap::new(),
        );
        assert_eq!(engines, vec!["shodan"]);
        assert_eq!(queries, vec!["q"]);
    }
}
