//! Reachability probing for embed mirror URLs
//!
//! A probe issues one lightweight HTTP request (HEAD, redirects followed, no
//! body download) against one mirror URL under a strict deadline and returns a
//! structured [`ProbeOutcome`]. Every network failure class - timeout,
//! connection refused, DNS failure - is converted to a zero-status outcome;
//! nothing raises past the probe boundary.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::Client;

use crate::error::Result;

/// Default per-probe deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Structured outcome of one probe
///
/// `status_code` is the HTTP status on completion, or 0 when the request
/// never completed (timeout, connection refused, DNS failure).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status_code: u16,
    pub response_time_ms: u64,
    pub checked_at: DateTime<Utc>,
    /// Failure description when `status_code` is 0
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Failure outcome with zero status
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status_code: 0,
            response_time_ms: 0,
            checked_at: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// A reachability check against one URL
///
/// The trait seam lets the health recorder run against scripted outcomes in
/// tests without touching the network.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Probe one URL; never returns an error for network failures
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// HTTP prober backed by a shared reqwest client
///
/// One client (and its connection pool) is built per prober and reused across
/// cycles. An internal rate limiter spaces out requests so a large batch does
/// not trip upstream rate limits; the concurrency bound lives in the health
/// recorder.
pub struct HttpProber {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl HttpProber {
    /// Create a prober with the default 5s deadline
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn new(requests_per_second: u32) -> Result<Self> {
        Self::with_timeout(requests_per_second, DEFAULT_TIMEOUT)
    }

    /// Create a prober with a custom per-probe deadline
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created
    pub fn with_timeout(requests_per_second: u32, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("mirrorwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::new(1).unwrap());
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            client,
            rate_limiter,
        })
    }

    fn classify(error: &reqwest::Error) -> String {
        if error.is_timeout() {
            "timeout".to_string()
        } else if error.is_connect() {
            format!("connect: {error}")
        } else {
            error.to_string()
        }
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        self.rate_limiter.until_ready().await;

        // HEAD avoids downloading embed player bodies. Mirrors that refuse
        // HEAD answer 405, which counts as failing like any other non-2xx/3xx.
        let start = Instant::now();
        match self.client.head(url).send().await {
            Ok(response) => {
                let elapsed = start.elapsed().as_millis() as u64;
                let status = response.status().as_u16();
                tracing::debug!(url = %url, status = %status, elapsed_ms = %elapsed, "probe completed");

                ProbeOutcome {
                    status_code: status,
                    response_time_ms: elapsed,
                    checked_at: Utc::now(),
                    error: None,
                }
            }
            Err(e) => {
                let reason = Self::classify(&e);
                tracing::debug!(url = %url, error = %reason, "probe failed");
                ProbeOutcome::failure(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_outcome_has_zero_status() {
        let outcome = ProbeOutcome::failure("timeout");
        assert_eq!(outcome.status_code, 0);
        assert_eq!(outcome.response_time_ms, 0);
        assert_eq!(outcome.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_prober_creation() {
        assert!(HttpProber::new(10).is_ok());
        assert!(HttpProber::with_timeout(5, Duration::from_secs(2)).is_ok());
        // Zero rate falls back to one request per second instead of failing
        assert!(HttpProber::new(0).is_ok());
    }

    #[tokio::test]
    async fn test_unresolvable_host_yields_failure_outcome() {
        let prober = HttpProber::with_timeout(100, Duration::from_secs(2)).unwrap();
        let outcome = prober
            .probe("http://mirror.invalid.localdomain.example/embed/1")
            .await;

        assert_eq!(outcome.status_code, 0);
        assert!(outcome.error.is_some());
    }
}
