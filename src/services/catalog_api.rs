//! Trait and types for looking up dataset metadata in a CKAN-style catalog.

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One downloadable file attached to a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub url: String,
    /// Upper-cased format label, e.g. `CSV`, `JSON`.
    pub format: String,
    pub last_modified: Option<String>,
}

impl Resource {
    pub fn is_json(&self) -> bool {
        self.format == "JSON" || self.url.to_ascii_lowercase().ends_with(".json")
    }

    pub fn is_csv(&self) -> bool {
        self.format == "CSV" || self.url.to_ascii_lowercase().ends_with(".csv")
    }
}

/// Catalog metadata for a dataset, resolved before any download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: String,
    pub name: String,
    pub title: String,
    pub organization: Option<String>,
    pub license: Option<String>,
    pub last_modified: Option<String>,
    pub resources: Vec<Resource>,
}

impl DatasetInfo {
    /// The resource to download: the first JSON resource, else the first CSV.
    pub fn preferred_resource(&self) -> Option<&Resource> {
        self.resources
            .iter()
            .find(|r| r.is_json())
            .or_else(|| self.resources.iter().find(|r| r.is_csv()))
    }
}

/// Abstraction over a dataset catalog provider (e.g., HDX).
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    /// Resolves metadata and resource URLs for one dataset id.
    async fn dataset(&self, id: &str) -> Result<DatasetInfo>;
}
