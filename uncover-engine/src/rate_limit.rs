//! Per-source request pacing.
//!
//! Each source gets an independent sliding-window limiter admitting at most
//! `max_count` requests per `window`. Unlimited limiters admit everything.
//! [`RateLimiters`] maps source names to limiters and rejects names it was
//! never built with.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::error::UncoverError;

/// Rate limiting error.
#[derive(Debug, Clone, Error)]
pub enum RateLimitError {
    /// Window is full; must wait before sending.
    #[error("rate limit exceeded; retry after {retry_after:?}")]
    Exceeded {
        /// Time until the oldest request in the window ages out.
        retry_after: Duration,
    },
}

/// Pacing profile for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitProfile {
    /// Requests admitted per window.
    pub max_count: u32,
    /// Window length.
    pub window: Duration,
    /// Pass-through mode: every request is admitted immediately.
    pub unlimited: bool,
}

impl RateLimitProfile {
    /// A bounded profile.
    pub const fn limited(max_count: u32, window: Duration) -> Self {
        Self {
            max_count,
            window,
            unlimited: false,
        }
    }

    /// A pass-through profile. `max_count`/`window` are kept for reporting.
    pub const fn unlimited(max_count: u32, window: Duration) -> Self {
        Self {
            max_count,
            window,
            unlimited: true,
        }
    }
}

const SECOND: Duration = Duration::from_secs(1);

/// Default pacing for every engine uncover knows about.
pub fn default_profile(engine: &str) -> Option<RateLimitProfile> {
    let profile = match engine {
        "shodan" | "shodan-idb" | "fofa" | "quake" | "criminalip" => {
            RateLimitProfile::unlimited(1, SECOND)
        }
        "censys" => RateLimitProfile::limited(1, Duration::from_secs(3)),
        "hunter" => RateLimitProfile::limited(15, SECOND),
        "zoomeye" | "netlas" | "hunterhow" | "google" => RateLimitProfile::limited(1, SECOND),
        "publicwww" => RateLimitProfile::limited(1, Duration::from_secs(60)),
        _ => return None,
    };
    Some(profile)
}

/// Sliding-window limiter for a single source.
#[derive(Debug)]
pub struct RateLimiter {
    profile: RateLimitProfile,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    /// Create a limiter for `profile`. A zero `max_count` admits one request
    /// per window.
    #[must_use]
    pub fn new(profile: RateLimitProfile) -> Self {
        Self {
            profile: RateLimitProfile {
                max_count: profile.max_count.max(1),
                ..profile
            },
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// The profile this limiter enforces.
    pub fn profile(&self) -> RateLimitProfile {
        self.profile
    }

    /// Admit one request if the window has room.
    ///
    /// On success the request is recorded. On failure nothing is recorded
    /// and the error says how long until a slot frees.
    pub fn try_take(&self) -> Result<(), RateLimitError> {
        if self.profile.unlimited {
            return Ok(());
        }

        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();

        while let Some(&first) = window.front() {
            if now.duration_since(first) >= self.profile.window {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.profile.max_count as usize {
            if let Some(&oldest) = window.front() {
                let age = now.duration_since(oldest);
                let retry_after = self.profile.window.saturating_sub(age);
                return Err(RateLimitError::Exceeded { retry_after });
            }
        }

        window.push_back(now);
        Ok(())
    }

    /// Wait until the window admits one request, then record it.
    pub async fn take(&self) {
        loop {
            match self.try_take() {
                Ok(()) => return,
                Err(RateLimitError::Exceeded { retry_after }) => {
                    tokio::time::sleep(retry_after.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}

/// Rate limiters for every source a session knows about.
#[derive(Debug, Default)]
pub struct RateLimiters {
    limiters: HashMap<String, RateLimiter>,
}

impl RateLimiters {
    /// Build limiters for `engines` from the default table.
    ///
    /// A positive `override_count` replaces `max_count` and `window` for
    /// every engine uniformly and makes them all bounded.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::UnknownEngineDefaults`] for an engine with no
    /// default profile.
    pub fn for_engines<S: AsRef<str>>(
        engines: &[S],
        override_count: u32,
        override_window: Duration,
    ) -> Result<Self, UncoverError> {
        let mut limiters = HashMap::new();
        for engine in engines {
            let engine = engine.as_ref();
            let mut profile = default_profile(engine)
                .ok_or_else(|| UncoverError::UnknownEngineDefaults(engine.to_owned()))?;
            if override_count > 0 {
                profile = RateLimitProfile::limited(override_count, override_window);
            }
            tracing::debug!(
                source = engine,
                max_count = profile.max_count,
                window_ms = profile.window.as_millis() as u64,
                unlimited = profile.unlimited,
                "rate limiter registered"
            );
            limiters.insert(engine.to_owned(), RateLimiter::new(profile));
        }
        Ok(Self { limiters })
    }

    /// Register or replace the limiter for `source`.
    pub fn insert(&mut self, source: impl Into<String>, profile: RateLimitProfile) {
        self.limiters.insert(source.into(), RateLimiter::new(profile));
    }

    /// Wait for `source`'s limiter to admit one request.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::UnknownSource`] if `source` was never registered.
    pub async fn take(&self, source: &str) -> Result<(), UncoverError> {
        let limiter = self
            .limiters
            .get(source)
            .ok_or_else(|| UncoverError::UnknownSource(source.to_owned()))?;
        limiter.take().await;
        Ok(())
    }

    /// Admit one request for `source` without waiting.
    ///
    /// Returns `Ok(false)` when the window is full.
    ///
    /// # Errors
    ///
    /// Returns [`UncoverError::UnknownSource`] if `source` was never registered.
    pub fn try_take(&self, source: &str) -> Result<bool, UncoverError> {
        let limiter = self
            .limiters
            .get(source)
            .ok_or_else(|| UncoverError::UnknownSource(source.to_owned()))?;
        Ok(limiter.try_take().is_ok())
    }

    /// Whether `source` has a limiter.
    pub fn contains(&self, source: &str) -> bool {
        self.limiters.contains_key(source)
    }

    /// The profile enforced for `source`.
    pub fn profile(&self, source: &str) -> Option<RateLimitProfile> {
        self.limiters.get(source).map(RateLimiter::profile)
    }
}
