mod basic;
mod client;
pub mod auth;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use retry::{
    FetchError, FetchedBody, RetryEvent, RetryPolicy, RetryReason, batch_fetch_with_retry,
    fetch_with_retry,
};

use std::time::Duration;

use tracing::info;

/// Fetches `url` under `policy` and returns the body bytes.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Vec<u8>, FetchError> {
    Ok(fetch_with_retry(client, url, policy).await?.body)
}

/// Builds the production client, wrapped in an `Authorization` header when an
/// API key is configured. A missing key is not an error.
pub fn build_client(
    timeout: Duration,
    api_key: Option<&str>,
) -> anyhow::Result<Box<dyn HttpClient>> {
    let basic = BasicClient::new(timeout).map_err(FetchError::Build)?;
    match api_key {
        Some(key) if !key.trim().is_empty() => {
            Ok(Box::new(auth::ApiKey::authorization(basic, key.trim())?))
        }
        _ => {
            info!("No API key configured, requests are unauthenticated");
            Ok(Box::new(basic))
        }
    }
}
