//! Configuration for command-line runs.
//!
//! A TOML file holds a `[search]` section with run options and a `[provider]`
//! section with API key pools. Keys found in the environment are appended to
//! the file's pools.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uncover_engine::{KeyPools, ServiceOptions, fold_engine_queries};

use crate::error::{Result, RunnerError};

/// Engine used when none is named anywhere.
pub const DEFAULT_ENGINE: &str = "shodan";

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UncoverConfig {
    /// Run options.
    pub search: SearchConfig,
    /// API key pools. Paired credentials are written `first:second`.
    pub provider: KeyPools,
}

/// Run options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Engines every query is sent to.
    pub engines: Vec<String>,
    /// Queries sent to every engine.
    pub queries: Vec<String>,
    /// Per-engine query lists. Each non-empty list selects its engine.
    pub engine_queries: BTreeMap<String, Vec<String>>,
    /// Result cap per (query, engine) pair. 0 means unbounded.
    pub limit: usize,
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Retries per request.
    pub retry: u32,
    /// Requests per second for every engine (0 = per-engine defaults).
    pub rate_limit: u32,
    /// Requests per minute for every engine; takes precedence over `rate_limit`.
    pub rate_limit_minute: u32,
    /// Output file, truncated on open.
    pub output: Option<PathBuf>,
    /// Field template for plain output (`ip`, `host`, `port`, `url`).
    pub fields: String,
    /// Write JSON lines.
    pub json: bool,
    /// Write upstream records as received.
    pub raw: bool,
    /// Opaque per-source hints attached to every query.
    pub extensions: BTreeMap<String, String>,
    /// `User-Agent` sent to every engine. Unset uses the crate default.
    pub user_agent: Option<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            engines: Vec::new(),
            queries: Vec::new(),
            engine_queries: BTreeMap::new(),
            limit: 100,
            timeout: 30,
            retry: 2,
            rate_limit: 0,
            rate_limit_minute: 0,
            output: None,
            fields: "ip:port".to_owned(),
            json: false,
            raw: false,
            extensions: BTreeMap::new(),
            user_agent: None,
        }
    }
}

/// How merged results are rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// One JSON object per line, deduplicated by `ip:port`.
    Json,
    /// Upstream record as received.
    Raw,
    /// Field template such as `ip:port` or `host`.
    Fields(String),
}

impl UncoverConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            RunnerError::Config(format!("failed to parse config file '{}': {e}", path.display()))
        })
    }

    /// Load `path` if given, else the default file if it exists, else defaults.
    ///
    /// # Errors
    ///
    /// An explicit path that cannot be read or parsed is an error. A broken
    /// default file is too.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Self::default_path();
                if default.is_file() {
                    tracing::debug!(path = %default.display(), "loading default config");
                    Self::from_file(&default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Returns the default config file path: `<config dir>/uncover/config.toml`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("uncover"))
            .unwrap_or_else(|| PathBuf::from("/tmp/uncover-config"))
            .join("config.toml")
    }

    /// The single output mode selected by `json`, `raw` and `fields`.
    ///
    /// # Errors
    ///
    /// `json` and `raw` together are rejected.
    pub fn output_mode(&self) -> Result<OutputMode> {
        match (self.search.json, self.search.raw) {
            (true, true) => Err(RunnerError::Config(
                "json and raw output are mutually exclusive".into(),
            )),
            (true, false) => Ok(OutputMode::Json),
            (false, true) => Ok(OutputMode::Raw),
            (false, false) => {
                let fields = self.search.fields.trim();
                Ok(OutputMode::Fields(if fields.is_empty() {
                    "ip:port".to_owned()
                } else {
                    fields.to_owned()
                }))
            }
        }
    }

    /// Orchestration options: per-engine queries folded in, default engine
    /// applied, rate-limit window chosen.
    ///
    /// # Errors
    ///
    /// Returns the engine's validation error for an unusable combination.
    pub fn service_options(&self) -> Result<ServiceOptions> {
        let search = &self.search;
        let (mut engines, queries) =
            fold_engine_queries(&search.engines, &search.queries, &search.engine_queries);
        if engines.is_empty() {
            engines.push(DEFAULT_ENGINE.to_owned());
        }

        let (rate_limit, rate_limit_window) = if search.rate_limit_minute > 0 {
            (search.rate_limit_minute, Duration::from_secs(60))
        } else {
            (search.rate_limit, Duration::from_secs(1))
        };

        let options = ServiceOptions {
            engines,
            queries,
            limit: search.limit,
            max_retries: search.retry,
            timeout_seconds: search.timeout,
            rate_limit,
            rate_limit_window,
            extensions: search.extensions.clone(),
            user_agent: search.user_agent.clone(),
            ..Default::default()
        };
        options.validate()?;
        Ok(options)
    }

    /// The file's key pools with environment keys appended.
    pub fn key_pools(&self) -> KeyPools {
        let mut pools = self.provider.clone();
        pools.extend(key_pools_from_env());
        pools
    }
}

/// Key pools read from the process environment.
pub fn key_pools_from_env() -> KeyPools {
    key_pools_from_lookup(|name| std::env::var(name).ok())
}

/// Key pools read through `lookup`, one entry per variable (or pair).
///
/// A pair with only one half present is skipped with a warning.
pub fn key_pools_from_lookup<F>(lookup: F) -> KeyPools
where
    F: Fn(&str) -> Option<String>,
{
    let get = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
    let single = |name: &str| get(name).into_iter().collect::<Vec<_>>();
    let pair = |first: &str, second: &str| match (get(first), get(second)) {
        (Some(a), Some(b)) => vec![format!("{a}:{b}")],
        (None, None) => Vec::new(),
        _ => {
            tracing::warn!("{first} and {second} must both be set; ignoring");
            Vec::new()
        }
    };

    KeyPools {
        shodan: single("SHODAN_API_KEY"),
        censys: pair("CENSYS_API_ID", "CENSYS_API_SECRET"),
        fofa: pair("FOFA_EMAIL", "FOFA_KEY"),
        quake: single("QUAKE_TOKEN"),
        hunter: single("HUNTER_API_KEY"),
        zoomeye: single("ZOOMEYE_API_KEY"),
        netlas: single("NETLAS_API_KEY"),
        criminalip: single("CRIMINALIP_API_KEY"),
        publicwww: single("PUBLICWWW_API_KEY"),
        hunterhow: single("HUNTERHOW_API_KEY"),
        google: pair("GOOGLE_API_KEY", "GOOGLE_API_CX"),
    }
}
