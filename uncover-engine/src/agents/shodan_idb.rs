//! Shodan InternetDB lookup. Anonymous; the query must be a single IP.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::paging::{paginate, Page, PageSource};
use crate::agent::{Agent, ResultStream};
use crate::error::UncoverError;
use crate::session::Session;
use crate::types::{Query, SearchResult};

const NAME: &str = "shodan-idb";
const DEFAULT_BASE_URL: &str = "https://internetdb.shodan.io";
const CHANNEL_BUFFER: usize = 32;

/// InternetDB agent: open ports and hostnames for one address.
#[derive(Debug, Clone)]
pub struct ShodanIdbAgent {
    base_url: String,
}

impl ShodanIdbAgent {
    /// Agent for the public InternetDB endpoint.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Agent for an InternetDB-compatible server at `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl Default for ShodanIdbAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ShodanIdbAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_anonymous(&self) -> bool {
        true
    }

    async fn query(&self, session: &Session, query: &Query) -> Result<ResultStream, UncoverError> {
        let pages = Arc::new(IdbLookup {
            base_url: self.base_url.clone(),
        });
        Ok(paginate(pages, session.clone(), query.clone(), CHANNEL_BUFFER))
    }
}

struct IdbLookup {
    base_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct IdbResponse {
    ip: String,
    #[serde(default)]
    ports: Vec<u16>,
    #[serde(default)]
    hostnames: Vec<String>,
    #[serde(default)]
    cpes: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    vulns: Vec<String>,
}

#[async_trait]
impl PageSource for IdbLookup {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_page(
        &self,
        session: &Session,
        query: &Query,
        page: usize,
    ) -> Result<Page, UncoverError> {
        // single-record API
        if page > 1 {
            return Ok(Page::default());
        }
        let ip: IpAddr = query.text.trim().parse().map_err(|_| {
            UncoverError::Parse(format!("{NAME} expects an IP address, got {:?}", query.text))
        })?;

        let request = session.get(format!("{}/{ip}", self.base_url));
        let response = match session.send(request, NAME).await {
            Ok(response) => response,
            Err(e) if e.status_code() == Some(StatusCode::NOT_FOUND.as_u16()) => {
                tracing::debug!(source = NAME, %ip, "no information available");
                return Ok(Page::default());
            }
            Err(e) => return Err(e),
        };
        let body: IdbResponse = response
            .json()
            .await
            .map_err(|e| UncoverError::Parse(format!("{NAME} response: {}", e.without_url())))?;

        let results = to_results(&body);
        let total = Some(results.len());
        Ok(Page { results, total })
    }
}

/// One result per open port; the last hostname is attached to each.
fn to_results(body: &IdbResponse) -> Vec<SearchResult> {
    let raw = serde_json::to_vec(body).unwrap_or_default();
    let host = body.hostnames.last().cloned().unwrap_or_default();
    let fingerprints = (!body.cpes.is_empty()).then(|| body.cpes.join(","));
    body.ports
        .iter()
        .map(|&port| SearchResult {
            ip: body.ip.clone(),
            port,
            host: host.clone(),
            raw: raw.clone(),
            fingerprints: fingerprints.clone(),
            ..SearchResult::new(NAME)
        })
        .collect()
}
