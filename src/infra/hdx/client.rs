use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;

use crate::fetch::{HttpClient, RetryPolicy, fetch_with_retry};
use crate::services::catalog_api::{CatalogApi, DatasetInfo, Resource};

#[derive(Deserialize)]
struct ActionResponse {
    success: bool,
    #[serde(default)]
    result: Option<Package>,
    #[serde(default)]
    error: Option<ActionError>,
}

#[derive(Deserialize)]
struct ActionError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct Package {
    id: String,
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    organization: Option<Organization>,
    #[serde(default)]
    license_title: Option<String>,
    #[serde(default)]
    metadata_modified: Option<String>,
    #[serde(default)]
    resources: Vec<PackageResource>,
}

#[derive(Deserialize)]
struct Organization {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct PackageResource {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    last_modified: Option<String>,
}

/// HDX CKAN action API client (`package_show`).
pub struct HdxClient {
    base_url: String,
    http: Arc<dyn HttpClient>,
    policy: RetryPolicy,
}

impl HdxClient {
    pub fn new(base_url: impl Into<String>, http: Arc<dyn HttpClient>, policy: RetryPolicy) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            policy,
        }
    }

    fn package_show_url(&self, id: &str) -> Result<String> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/package_show", self.base_url),
            &[("id", id)],
        )
        .with_context(|| format!("invalid HDX base URL '{}'", self.base_url))?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl CatalogApi for HdxClient {
    async fn dataset(&self, id: &str) -> Result<DatasetInfo> {
        let url = self.package_show_url(id)?;
        let body = fetch_with_retry(self.http.as_ref(), &url, &self.policy).await?;

        let response: ActionResponse = serde_json::from_slice(&body.body)
            .with_context(|| format!("Failed to parse package_show response for '{id}'"))?;

        if !response.success {
            let message = response.error.map(|e| e.message).unwrap_or_default();
            return Err(anyhow!("HDX package_show failed for '{id}': {message}"));
        }
        let package = response
            .result
            .ok_or_else(|| anyhow!("HDX package_show returned no result for '{id}'"))?;

        let resources = package
            .resources
            .into_iter()
            .filter_map(|r| {
                let url = r.url.filter(|u| !u.trim().is_empty())?;
                Some(Resource {
                    name: r.name.unwrap_or_else(|| r.id.clone()),
                    id: r.id,
                    url,
                    format: r.format.unwrap_or_default().trim().to_ascii_uppercase(),
                    last_modified: r.last_modified,
                })
            })
            .collect();

        Ok(DatasetInfo {
            title: package.title.unwrap_or_else(|| package.name.clone()),
            id: package.id,
            name: package.name,
            organization: package.organization.and_then(|o| o.title.or(o.name)),
            license: package.license_title,
            last_modified: package.metadata_modified,
            resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockClient;

    const BASE: &str = "https://hdx.test/api/3/action";

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay_ms: 1,
            backoff_multiplier: 1.0,
            max_delay_ms: 1,
        }
    }

    const PACKAGE: &str = r#"{
        "success": true,
        "result": {
            "id": "abc-123",
            "name": "gaza-conflict-events",
            "title": "Gaza Conflict Events",
            "organization": {"name": "acled", "title": "ACLED"},
            "license_title": "CC BY 4.0",
            "metadata_modified": "2024-09-01T10:00:00",
            "resources": [
                {"id": "r1", "name": "events.csv", "url": "https://files.test/events.csv", "format": "csv"},
                {"id": "r2", "name": "no url", "url": ""}
            ]
        }
    }"#;

    #[tokio::test]
    async fn test_dataset_maps_package_fields() {
        let http = MockClient::new().route(&format!("{BASE}/package_show"), 200, PACKAGE);
        let client = HdxClient::new(BASE, Arc::new(http), fast_policy());

        let info = client.dataset("gaza-conflict-events").await.unwrap();

        assert_eq!(info.title, "Gaza Conflict Events");
        assert_eq!(info.organization.as_deref(), Some("ACLED"));
        assert_eq!(info.license.as_deref(), Some("CC BY 4.0"));
        assert_eq!(info.resources.len(), 1);
        assert_eq!(info.resources[0].format, "CSV");
        assert_eq!(
            info.preferred_resource().unwrap().url,
            "https://files.test/events.csv"
        );
    }

    #[tokio::test]
    async fn test_unsuccessful_action_is_an_error() {
        let http = MockClient::new().route(
            &format!("{BASE}/package_show"),
            200,
            r#"{"success": false, "error": {"message": "Not found"}}"#,
        );
        let client = HdxClient::new(BASE, Arc::new(http), fast_policy());

        let err = client.dataset("missing").await.unwrap_err();
        assert!(err.to_string().contains("Not found"));
    }

    #[test]
    fn test_package_show_url_encodes_id() {
        let client = HdxClient::new(format!("{BASE}/"), Arc::new(MockClient::new()), fast_policy());
        assert_eq!(
            client.package_show_url("a b").unwrap(),
            format!("{BASE}/package_show?id=a+b")
        );
    }
}
