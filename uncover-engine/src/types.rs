//! Core types shared by agents, the orchestrator and the output writer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::error::UncoverError;

/// A single search query dispatched to every selected agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Engine-specific query text. Never empty.
    pub text: String,
    /// Maximum number of results an agent should return. `0` means the
    /// agent runs until the upstream API's pages are exhausted.
    pub limit: usize,
    /// Per-source hints (`full`, `status_code`, `start_time`, ...). Only the
    /// agents that understand a key look at it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: BTreeMap<String, String>,
}

impl Query {
    /// Create a query with no extension hints.
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            extensions: BTreeMap::new(),
        }
    }

    /// Attach an opaque per-source hint.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Look up a per-source hint.
    pub fn extension(&self, key: &str) -> Option<&str> {
        self.extensions.get(key).map(String::as_str)
    }

    /// Whether `count` results already satisfy this query's limit.
    pub fn limit_reached(&self, count: usize) -> bool {
        self.limit > 0 && count >= self.limit
    }
}

/// A normalised asset returned by one source.
///
/// A result whose [`error`](Self::error) is set is a diagnostic, not a data
/// record: it is reported to the operator and never deduplicated or written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResult {
    /// Unix seconds, stamped by the orchestrator when the result is merged.
    pub timestamp: i64,
    /// Name of the agent that produced this result.
    pub source: String,
    /// IP address of the asset (may be empty for host-only results).
    pub ip: String,
    /// Service port (0 when unknown).
    pub port: u16,
    /// Hostname of the asset.
    pub host: String,
    /// URL of the asset when the source reports one.
    pub url: String,
    /// Upstream record as received, before normalisation.
    #[serde(skip)]
    pub raw: Vec<u8>,
    /// Per-item failure reported by the source.
    #[serde(skip)]
    pub error: Option<Arc<UncoverError>>,
    /// HTML title of the service landing page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_title: Option<String>,
    /// Registered domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Country name or code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// City.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    /// Autonomous system number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    /// Owning organisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    /// Internet service provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    /// Service banner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    /// Detected service name (`http`, `ssh`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// HTTP status code of the service landing page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// `Server` header value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Technology fingerprints, comma separated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprints: Option<String>,
}

impl SearchResult {
    /// Create an empty data result attributed to `source`.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    /// Create a diagnostic result carrying `error`.
    pub fn error(source: impl Into<String>, error: UncoverError) -> Self {
        Self {
            source: source.into(),
            error: Some(Arc::new(error)),
            ..Default::default()
        }
    }

    /// Whether this result is a diagnostic rather than a data record.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `ip:port`, bracketing IPv6 addresses.
    pub fn ip_port(&self) -> String {
        join_host_port(&self.ip, self.port)
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn host_port(&self) -> String {
        join_host_port(&self.host, self.port)
    }

    /// The raw upstream record as text.
    pub fn raw_data(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    /// Serialise as a single JSON line. `raw` and `error` are excluded.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{host}]:{port}"),
        _ if host.contains(':') => format!("[{host}]:{port}"),
        _ => format!("{host}:{port}"),
    }
}
