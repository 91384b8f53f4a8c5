use async_trait::async_trait;
use reqwest::{Request, Response};

/// The single seam every outbound request goes through.
///
/// Decorators (see [`crate::fetch::auth`]) wrap another client, and tests swap
/// in a canned implementation.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
