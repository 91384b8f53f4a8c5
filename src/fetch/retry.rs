//! Retrying GET with exponential backoff and `Retry-After` support.
//!
//! Retry attempts are reported back to the caller inside [`FetchedBody`] or
//! [`FetchError::Exhausted`] instead of through a callback.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::client::HttpClient;

/// Backoff schedule shared by every fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts made before giving up.
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// `initial_delay_ms * backoff_multiplier^retry`, capped at `max_delay_ms`.
    /// `retry` is zero for the first retry.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(retry as i32);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn max_attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Why an attempt was considered transient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RetryReason {
    RateLimited,
    ServerError(u16),
    Network(String),
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryReason::RateLimited => write!(f, "rate limited (429)"),
            RetryReason::ServerError(status) => write!(f, "server error ({status})"),
            RetryReason::Network(msg) => write!(f, "network error: {msg}"),
        }
    }
}

/// One scheduled retry: the attempt that failed, and how long we waited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryEvent {
    pub attempt: u32,
    pub delay_ms: u64,
    pub reason: RetryReason,
}

/// A fully read successful response.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    pub url: String,
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub retries: Vec<RetryEvent>,
}

impl FetchedBody {
    pub fn attempts(&self) -> u32 {
        self.retries.len() as u32 + 1
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// 4xx other than 429. Never retried.
    #[error("{url} returned client error {status}")]
    Client {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("{url} failed after {attempts} attempts, last error: {last}")]
    Exhausted {
        url: String,
        attempts: u32,
        last: RetryReason,
        retries: Vec<RetryEvent>,
    },

    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// GETs `url`, retrying 429, 5xx and network failures per `policy`.
///
/// # Errors
///
/// [`FetchError::Client`] on the first non-429 4xx, [`FetchError::Exhausted`]
/// once `policy.max_retries` attempts have all failed transiently.
pub async fn fetch_with_retry<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    policy: &RetryPolicy,
) -> Result<FetchedBody, FetchError> {
    let parsed = url
        .parse::<reqwest::Url>()
        .map_err(|e| FetchError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let max_attempts = policy.max_attempts();
    let mut retries = Vec::new();
    let mut attempt = 0;

    loop {
        attempt += 1;
        debug!(url, attempt, "Sending request");

        let req = reqwest::Request::new(reqwest::Method::GET, parsed.clone());
        let (reason, retry_after) = match client.execute(req).await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    let content_type = resp
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    match resp.bytes().await {
                        Ok(bytes) => {
                            return Ok(FetchedBody {
                                url: url.to_string(),
                                status,
                                content_type,
                                body: bytes.to_vec(),
                                retries,
                            });
                        }
                        Err(e) => (RetryReason::Network(e.to_string()), None),
                    }
                } else if status == StatusCode::TOO_MANY_REQUESTS {
                    (RetryReason::RateLimited, parse_retry_after(resp.headers()))
                } else if status.is_server_error() {
                    (RetryReason::ServerError(status.as_u16()), None)
                } else {
                    let mut body = resp.text().await.unwrap_or_default();
                    body.truncate(512);
                    return Err(FetchError::Client {
                        url: url.to_string(),
                        status,
                        body,
                    });
                }
            }
            Err(e) => (RetryReason::Network(e.to_string()), None),
        };

        if attempt >= max_attempts {
            return Err(FetchError::Exhausted {
                url: url.to_string(),
                attempts: attempt,
                last: reason,
                retries,
            });
        }

        let delay = retry_after
            .map(|d| d.min(policy.max_delay()))
            .unwrap_or_else(|| policy.backoff_delay(attempt - 1));
        let delay_ms = delay.as_millis() as u64;

        warn!(url, attempt, delay_ms, reason = %reason, "Request failed, retrying");
        retries.push(RetryEvent {
            attempt,
            delay_ms,
            reason,
        });
        tokio::time::sleep(delay).await;
    }
}

/// Fetches every URL with at most `concurrency` requests in flight.
///
/// Each URL settles independently; results come back in input order.
pub async fn batch_fetch_with_retry<C: HttpClient + ?Sized>(
    client: &C,
    urls: &[String],
    concurrency: usize,
    policy: &RetryPolicy,
) -> Vec<(String, Result<FetchedBody, FetchError>)> {
    stream::iter(urls.iter().cloned())
        .map(|url| async move {
            let result = fetch_with_retry(client, &url, policy).await;
            (url, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Some(wait)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockClient;

    const URL: &str = "http://api.test/data";

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay(10), Duration::from_millis(30_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_500_stops_after_max_retries() {
        let client = MockClient::new().route(URL, 500, "boom");
        let policy = RetryPolicy::default();

        let err = fetch_with_retry(&client, URL, &policy).await.unwrap_err();

        assert_eq!(client.calls_to(URL), 3);
        match err {
            FetchError::Exhausted {
                attempts,
                last,
                retries,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last, RetryReason::ServerError(500));
                assert_eq!(retries.len(), 2);
                assert_eq!(retries[0].delay_ms, 1000);
                assert_eq!(retries[1].delay_ms, 2000);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honored() {
        let client = MockClient::new()
            .route_with_headers(URL, 429, &[("Retry-After", "2")], "")
            .route(URL, 200, "[]");
        let policy = RetryPolicy::default();

        let start = tokio::time::Instant::now();
        let fetched = fetch_with_retry(&client, URL, &policy).await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(fetched.attempts(), 2);
        assert_eq!(fetched.retries[0].reason, RetryReason::RateLimited);
        assert_eq!(fetched.retries[0].delay_ms, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_429_without_header_uses_backoff() {
        let client = MockClient::new()
            .route(URL, 429, "")
            .route(URL, 200, "ok");

        let fetched = fetch_with_retry(&client, URL, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(fetched.retries[0].delay_ms, 1000);
        assert_eq!(fetched.body, b"ok");
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_is_not_retried() {
        let client = MockClient::new().route(URL, 404, "not found");

        let err = fetch_with_retry(&client, URL, &RetryPolicy::default())
            .await
            .unwrap_err();

        assert_eq!(client.calls_to(URL), 1);
        assert!(matches!(err, FetchError::Client { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let client = MockClient::new()
            .route(URL, 503, "")
            .route(URL, 200, r#"{"ok":true}"#);

        let fetched = fetch_with_retry(&client, URL, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(fetched.status, StatusCode::OK);
        assert_eq!(fetched.retries.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let client = MockClient::new();
        let err = fetch_with_retry(&client, "not a url", &RetryPolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl { .. }));
        assert_eq!(client.calls_to(""), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_isolates_failures_and_keeps_order() {
        let client = MockClient::new()
            .route("http://api.test/a", 200, "a")
            .route("http://api.test/b", 400, "bad")
            .route("http://api.test/c", 200, "c");
        let urls: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|p| format!("http://api.test/{p}"))
            .collect();

        let results = batch_fetch_with_retry(&client, &urls, 2, &RetryPolicy::default()).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, urls[0]);
        assert_eq!(results[0].1.as_ref().unwrap().body, b"a");
        assert!(results[1].1.is_err());
        assert_eq!(results[2].1.as_ref().unwrap().body, b"c");
    }
}
