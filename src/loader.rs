//! Reading script sources into document lists.

use crate::error::RuntimeError;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Where a source locator points.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    Remote(Url),
    Local(PathBuf),
}

impl Locator {
    /// `http`/`https` URLs are remote, `file:` URLs and everything
    /// else are local paths.
    pub fn parse(locator: &str) -> Self {
        match Url::parse(locator) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Locator::Remote(url),
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(Locator::Local)
                .unwrap_or_else(|_| Locator::Local(PathBuf::from(locator))),
            _ => Locator::Local(PathBuf::from(locator)),
        }
    }

    fn is_yaml(&self) -> bool {
        match self {
            Locator::Remote(url) => is_yaml_path(Path::new(url.path())),
            Locator::Local(path) => is_yaml_path(path),
        }
    }
}

/// Loads script sources from disk or over HTTP.
#[derive(Debug, Clone)]
pub struct DocumentLoader {
    client: reqwest::Client,
}

impl DocumentLoader {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for loading scripts")?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Load `locator` into a list of documents. A top-level array
    /// yields one document per element.
    pub async fn read(&self, locator: &str) -> Result<Vec<Value>, RuntimeError> {
        info!("Loading script source {}", locator);
        let root = self
            .load(locator)
            .await
            .map_err(|cause| RuntimeError::Load {
                locator: locator.to_string(),
                cause,
            })?;
        let documents = into_documents(root);
        debug!("Loaded {} document(s) from {}", documents.len(), locator);
        Ok(documents)
    }

    async fn load(&self, locator: &str) -> Result<Value> {
        let target = Locator::parse(locator);
        let content = match &target {
            Locator::Remote(url) => self
                .client
                .get(url.clone())
                .send()
                .await
                .context(format!("Failed to fetch {url}"))?
                .error_for_status()
                .context(format!("Unexpected status fetching {url}"))?
                .text()
                .await
                .context(format!("Failed to read body of {url}"))?,
            Locator::Local(path) => tokio::fs::read_to_string(path)
                .await
                .context(format!("Failed to read script file: {}", path.display()))?,
        };
        parse_document(&content, target.is_yaml())
    }
}

/// Parse source text as YAML or JSON.
pub fn parse_document(content: &str, yaml: bool) -> Result<Value> {
    if yaml {
        serde_yaml::from_str(content).context("Failed to parse YAML")
    } else {
        serde_json::from_str(content).context("Failed to parse JSON")
    }
}

/// Flatten a top-level array into its elements.
pub fn into_documents(root: Value) -> Vec<Value> {
    match root {
        Value::Array(items) => items,
        other => vec![other],
    }
}

fn is_yaml_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}
