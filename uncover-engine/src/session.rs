//! Shared, rate-limited, retrying HTTP session.
//!
//! Every outbound request an agent makes goes through [`Session::execute`],
//! which paces it with the source's rate limiter, disables connection reuse,
//! retries transient failures with capped exponential backoff, and turns a
//! non-2xx final response into [`UncoverError::UnexpectedStatus`].
//!
//! A session is cheap to clone. Clones share the HTTP client and the rate
//! limiters; [`Session::with_keys`] swaps only the credential snapshot.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderValue, CONNECTION};
use reqwest::{Request, RequestBuilder, Response, StatusCode};
use url::Url;

use crate::credentials::Keys;
use crate::error::UncoverError;
use crate::rate_limit::RateLimiters;

/// User-Agent sent with every request unless overridden.
pub const DEFAULT_USER_AGENT: &str =
    "Uncover - FOSS Project (github.com/projectdiscovery/uncover)";

/// Query parameters whose values are replaced before a URL appears in an error.
const SECRET_PARAMS: &[&str] = &["key", "apikey", "api_key", "token", "email", "access_token"];

/// Maximum number of body characters kept in [`UncoverError::UnexpectedStatus`].
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Construction parameters for a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Per-request timeout in seconds; also caps the retry backoff.
    pub timeout_seconds: u64,
    /// Global rate-limit override. `0` keeps each engine's default profile.
    pub rate_limit: u32,
    /// Window for the override.
    pub rate_limit_window: Duration,
    /// First retry delay; doubles on every further retry.
    pub retry_wait_min: Duration,
    /// Custom User-Agent. `None` uses [`DEFAULT_USER_AGENT`].
    pub user_agent: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            timeout_seconds: 30,
            rate_limit: 0,
            rate_limit_window: Duration::from_secs(1),
            retry_wait_min: Duration::from_secs(1),
            user_agent: None,
        }
    }
}

#[derive(Debug)]
struct SessionShared {
    client: reqwest::Client,
    limiters: RateLimiters,
    max_retries: u32,
    retry_wait_min: Duration,
    retry_wait_max: Duration,
}

/// Rate-limited, retrying request executor shared by all agent workers.
#[derive(Debug, Clone)]
pub struct Session {
    keys: Arc<Keys>,
    shared: Arc<SessionShared>,
}

impl Session {
    /// Build a session with one rate limiter per engine.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::UnknownEngineDefaults`] if an engine has no
    /// default rate-limit profile, or [`UncoverError::Http`] if the HTTP
    /// client cannot be constructed.
    pub fn new<S: AsRef<str>>(
        keys: Keys,
        options: &SessionOptions,
        engines: &[S],
    ) -> Result<Self, UncoverError> {
        let limiters =
            RateLimiters::for_engines(engines, options.rate_limit, options.rate_limit_window)?;
        Self::with_limiters(keys, options, limiters)
    }

    /// Build a session around an explicit set of rate limiters.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::Http`] if the HTTP client cannot be constructed.
    pub fn with_limiters(
        keys: Keys,
        options: &SessionOptions,
        limiters: RateLimiters,
    ) -> Result<Self, UncoverError> {
        if options.timeout_seconds == 0 {
            return Err(UncoverError::Config(
                "timeout_seconds must be greater than 0".into(),
            ));
        }
        let timeout = Duration::from_secs(options.timeout_seconds);
        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned());

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .pool_max_idle_per_host(0)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| UncoverError::Http(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            keys: Arc::new(keys),
            shared: Arc::new(SessionShared {
                client,
                limiters,
                max_retries: options.max_retries,
                retry_wait_min: options.retry_wait_min,
                retry_wait_max: timeout,
            }),
        })
    }

    /// The credential snapshot agents validate against.
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// A clone of this session carrying a different credential snapshot.
    ///
    /// The HTTP client and rate limiters stay shared.
    #[must_use]
    pub fn with_keys(&self, keys: Keys) -> Self {
        Self {
            keys: Arc::new(keys),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Start a GET request on the shared client.
    pub fn get(&self, url: impl reqwest::IntoUrl) -> RequestBuilder {
        self.shared.client.get(url)
    }

    /// Build `builder` and run it through [`execute`](Self::execute).
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub async fn send(
        &self,
        builder: RequestBuilder,
        source: &str,
    ) -> Result<Response, UncoverError> {
        let request = builder.build().map_err(|e| {
            UncoverError::Http(format!("failed to build request: {}", e.without_url()))
        })?;
        self.execute(request, source).await
    }

    /// Execute `request` on behalf of `source`.
    ///
    /// Waits on the source's rate limiter, sends with `Connection: close`,
    /// and retries transport failures and retryable status codes up to
    /// `max_retries` times.
    ///
    /// # Errors
    ///
    /// - [`UncoverError::UnknownSource`] if `source` has no rate limiter
    /// - [`UncoverError::RetriesExhausted`] when every attempt failed
    /// - [`UncoverError::UnexpectedStatus`] for a non-2xx final response;
    ///   the body is carried in the error
    pub async fn execute(
        &self,
        mut request: Request,
        source: &str,
    ) -> Result<Response, UncoverError> {
        self.shared.limiters.take(source).await?;

        request
            .headers_mut()
            .insert(CONNECTION, HeaderValue::from_static("close"));
        let display_url = redact_url(request.url());
        tracing::trace!(source, url = %display_url, "session request");

        let max_attempts = self.shared.max_retries.saturating_add(1);
        let mut pending = Some(request);
        let mut attempts = 0u32;
        let mut last_reason = String::new();

        while let Some(current) = pending.take() {
            attempts += 1;
            let retry_copy = if attempts < max_attempts {
                current.try_clone()
            } else {
                None
            };

            match self.shared.client.execute(current).await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if is_retryable_status(response.status()) => {
                    last_reason = format!("retryable status code {}", response.status().as_u16());
                }
                Ok(response) => return Err(unexpected_status(response, display_url).await),
                Err(e) => {
                    last_reason = e.without_url().to_string();
                }
            }

            pending = retry_copy;
            if pending.is_some() {
                let delay = self.backoff(attempts);
                tracing::debug!(
                    source,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason = %last_reason,
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(UncoverError::RetriesExhausted {
            attempts,
            reason: last_reason,
        })
    }

    /// Delay before the retry following attempt number `attempt` (1-based).
    fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        let multiplier = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
        self.shared
            .retry_wait_min
            .saturating_mul(multiplier)
            .min(self.shared.retry_wait_max)
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || (status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED)
}

async fn unexpected_status(response: Response, url: String) -> UncoverError {
    let code = response.status().as_u16();
    let body = response
        .text()
        .await
        .map(|text| text.chars().take(MAX_ERROR_BODY_CHARS).collect())
        .unwrap_or_default();
    UncoverError::UnexpectedStatus { code, url, body }
}

/// Unescape `url` for display, masking credential query parameters.
pub fn redact_url(url: &Url) -> String {
    let mut base = url.clone();
    base.set_query(None);
    base.set_fragment(None);
    let mut shown = urlencoding::decode(base.as_str())
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| base.to_string());

    if url.query().is_some_and(|q| !q.is_empty()) {
        let pairs: Vec<String> = url
            .query_pairs()
            .map(|(name, value)| {
                if SECRET_PARAMS.contains(&name.to_ascii_lowercase().as_str()) {
                    format!("{name}=REDACTED")
                } else {
                    format!("{name}={value}")
                }
            })
            .collect();
        shown.push('?');
        shown.push_str(&pairs.join("&"));
    }
    shown
}
