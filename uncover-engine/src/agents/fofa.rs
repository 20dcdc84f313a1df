//! Fofa search (`/api/v1/search/all`).
//!
//! The query is sent base64-encoded. Results are requested as
//! `ip,port,host` triples. Setting the `full` extension to `true` asks for
//! results older than one year.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use super::paging::{paginate, Page, PageSource};
use crate::agent::{Agent, ResultStream};
use crate::error::UncoverError;
use crate::session::Session;
use crate::types::{Query, SearchResult};

const NAME: &str = "fofa";
const DEFAULT_BASE_URL: &str = "https://fofa.info";
const FIELDS: &str = "ip,port,host";
const PAGE_SIZE: usize = 100;
const CHANNEL_BUFFER: usize = 32;

/// Fofa search agent. Requires an `email:key` credential pair.
#[derive(Debug, Clone)]
pub struct FofaAgent {
    base_url: String,
}

impl FofaAgent {
    /// Agent pointed at the public API.
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Agent pointed at another API root (used by tests).
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        }
    }
}

impl Default for FofaAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for FofaAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn query(&self, session: &Session, query: &Query) -> Result<ResultStream, UncoverError> {
        let keys = session.keys();
        if keys.fofa_email.is_empty() || keys.fofa_key.is_empty() {
            return Err(UncoverError::MissingCredentials { engine: NAME.into() });
        }
        let pages = Arc::new(FofaPages {
            base_url: self.base_url.clone(),
        });
        Ok(paginate(pages, session.clone(), query.clone(), CHANNEL_BUFFER))
    }
}

struct FofaPages {
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct FofaResponse {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    errmsg: String,
    #[serde(default)]
    size: usize,
    #[serde(default)]
    results: Vec<Vec<String>>,
}

#[async_trait]
impl PageSource for FofaPages {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_page(
        &self,
        session: &Session,
        query: &Query,
        page: usize,
    ) -> Result<Page, UncoverError> {
        let size = match query.limit {
            0 => PAGE_SIZE,
            limit => limit.min(PAGE_SIZE),
        };
        let full = query.extension("full").is_some_and(|v| v.eq_ignore_ascii_case("true"));
        let encoded = STANDARD.encode(query.text.as_bytes());
        let page_param = page.to_string();
        let size_param = size.to_string();

        let request = session
            .get(format!("{}/api/v1/search/all", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[
                ("email", session.keys().fofa_email.as_str()),
                ("key", session.keys().fofa_key.as_str()),
                ("qbase64", encoded.as_str()),
                ("fields", FIELDS),
                ("page", page_param.as_str()),
                ("size", size_param.as_str()),
                ("full", if full { "true" } else { "false" }),
            ]);
        let response = session.send(request, NAME).await?;
        let body: FofaResponse = response
            .json()
            .await
            .map_err(|e| UncoverError::Parse(format!("fofa response: {}", e.without_url())))?;

        if body.error {
            return Err(UncoverError::Http(format!("fofa: {}", body.errmsg)));
        }

        Ok(Page {
            results: body.results.iter().filter_map(|row| to_result(row)).collect(),
            total: (body.size > 0).then_some(body.size),
        })
    }
}

fn to_result(row: &[String]) -> Option<SearchResult> {
    let [ip, port, host] = row else {
        tracing::debug!(columns = row.len(), "skipping malformed fofa row");
        return None;
    };
    let mut result = SearchResult::new(NAME);
    result.ip = ip.clone();
    result.port = port.parse().unwrap_or_default();
    result.host = host.clone();
    result.raw = serde_json::to_vec(row).unwrap_or_default();
    Some(result)
}
