//! Shodan host search (`/shodan/host/search`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::paging::{paginate, Page, PageSource};
use crate::agent::{Agent, ResultStream};
use crate::error::UncoverError;
use crate::session::Session;
use crate::types::{Query, SearchResult};

const NAME: &str = "shodan";
const DEFAULT_BASE_URL: &str = "https://api.shodan.io";
const CHANNEL_BUFFER: usize = 32;

/// Shodan search agent. Requires a Shodan API key.
#[derive(Debug, Clone)]
pub struct ShodanAgent {
    base_url: String,
}

impl ShodanAgent {
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

impl Default for ShodanAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ShodanAgent {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn query(&self, session: &Session, query: &Query) -> Result<ResultStream, UncoverError> {
        if session.keys().shodan.is_empty() {
            return Err(UncoverError::MissingCredentials { engine: NAME.into() });
        }
        let pages = Arc::new(ShodanPages {
            base_url: self.base_url.clone(),
        });
        Ok(paginate(pages, session.clone(), query.clone(), CHANNEL_BUFFER))
    }
}

struct ShodanPages {
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ShodanResponse {
    #[serde(default)]
    matches: Vec<Value>,
    #[serde(default)]
    total: usize,
}

#[async_trait]
impl PageSource for ShodanPages {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn fetch_page(
        &self,
        session: &Session,
        query: &Query,
        page: usize,
    ) -> Result<Page, UncoverError> {
        let url = format!("{}/shodan/host/search", self.base_url);
        let page_param = page.to_string();
        let request = session.get(url).query(&[
            ("key", session.keys().shodan.as_str()),
            ("query", query.text.as_str()),
            ("page", page_param.as_str()),
        ]);
        let response = session.send(request, NAME).await?;
        let body: ShodanResponse = response
            .json()
            .await
            .map_err(|e| UncoverError::Parse(format!("shodan response: {}", e.without_url())))?;

        Ok(Page {
            results: body.matches.iter().map(to_result).collect(),
            total: (body.total > 0).then_some(body.total),
        })
    }
}

fn to_result(entry: &Value) -> SearchResult {
    let text = |pointer: &str| -> Option<String> {
        entry
            .pointer(pointer)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    let mut result = SearchResult::new(NAME);
    result.ip = text("/ip_str").unwrap_or_default();
    result.port = entry
        .get("port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or_default();
    // last hostname wins
    result.host = entry
        .get("hostnames")
        .and_then(Value::as_array)
        .and_then(|names| names.iter().filter_map(Value::as_str).last())
        .unwrap_or_default()
        .to_owned();
    result.domain = entry
        .get("domains")
        .and_then(Value::as_array)
        .and_then(|d| d.first())
        .and_then(Value::as_str)
        .map(str::to_owned);
    result.org = text("/org");
    result.isp = text("/isp");
    result.asn = text("/asn");
    result.country = text("/location/country_name");
    result.city = text("/location/city");
    result.html_title = text("/http/title");
    result.server = text("/http/server");
    result.service_name = text("/_shodan/module");
    result.banner = text("/data");
    result.status_code = entry
        .pointer("/http/status")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok());
    result.raw = serde_json::to_vec(entry).unwrap_or_default();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Keys;
    use crate::session::SessionOptions;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn keyed_session() -> Session {
        let keys = Keys {
            shodan: "shodan-key".into(),
            ..Default::default()
        };
        let options = SessionOptions {
            retry_wait_min: std::time::Duration::from_millis(10),
            ..Default::default()
        };
        Session::new(keys, &options, &[NAME]).expect("session")
    }

    fn matches(page: usize, count: usize) -> Vec<Value> {
        (0..count)
            .map(|i| {
                json!({
                    "ip_str": format!("10.0.{page}.{i}"),
                    "port": 443,
                    "hostnames": ["a.example.com", "b.example.com"],
                    "org": "Example Org",
                    "location": {"country_name": "Netherlands", "city": "Amsterdam"},
                    "http": {"title": "Login", "status": 200}
                })
            })
            .collect()
    }

    #[test]
    fn maps_match_fields() {
        let result = to_result(&matches(1, 1)[0]);
        assert_eq!(result.source, "shodan");
        assert_eq!(result.ip, "10.0.1.0");
        assert_eq!(result.port, 443);
        assert_eq!(result.host, "b.example.com");
        assert_eq!(result.country.as_deref(), Some("Netherlands"));
        assert_eq!(result.html_title.as_deref(), Some("Login"));
        assert_eq!(result.status_code, Some(200));
        assert!(result.raw_data().contains("ip_str"));
    }

    #[test]
    fn missing_hostnames_leave_host_empty() {
        let result = to_result(&json!({"ip_str": "1.2.3.4", "port": 22}));
        assert_eq!(result.ip_port(), "1.2.3.4:22");
        assert!(result.host.is_empty());
    }

    #[tokio::test]
    async fn refuses_without_key() {
        let session =
            Session::new(Keys::default(), &SessionOptions::default(), &[NAME]).expect("session");
        let err = ShodanAgent::new()
            .query(&session, &Query::new("port:22", 10))
            .await
            .err()
            .expect("missing key");
        assert_eq!(err.to_string(), "empty shodan keys");
    }

    #[tokio::test]
    async fn limit_five_with_pages_of_two_makes_three_requests() {
        let server = MockServer::start().await;
        for page in 1..=3 {
            Mock::given(method("GET"))
                .and(path("/shodan/host/search"))
                .and(query_param("page", page.to_string()))
                .and(query_param("key", "shodan-key"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"matches": matches(page, 2), "total": 1000})),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let agent = ShodanAgent::with_base_url(server.uri());
        let stream = agent
            .query(&keyed_session(), &Query::new("port:443", 5))
            .await
            .expect("stream");
        let results: Vec<SearchResult> = stream.collect().await;

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| !r.is_error()));
        // MockServer verifies the `.expect(1)` counts on drop.
    }

    #[tokio::test]
    async fn upstream_error_becomes_error_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/shodan/host/search"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
            .mount(&server)
            .await;

        let stream = ShodanAgent::with_base_url(server.uri())
            .query(&keyed_session(), &Query::new("port:22", 10))
            .await
            .expect("stream");
        let results: Vec<SearchResult> = stream.collect().await;

        assert_eq!(results.len(), 1);
        let err = results[0].error.as_ref().expect("error result");
        assert_eq!(err.status_code(), Some(401));
        assert!(!err.to_string().contains("shodan-key"));
    }
}
