use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;

use super::retry::{fetch_with_backoff, Backoff, FetchFailure};

/// Somewhere a panel CSV can be read from.
#[async_trait]
pub trait PanelSource {
    fn describe(&self) -> String;
    async fn fetch(&self) -> Result<String>;
}

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PanelSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))
    }
}

pub struct HttpSource {
    client: Client,
    url: String,
    backoff: Backoff,
}

impl HttpSource {
    pub fn new(url: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            backoff: Backoff::with_retries(max_retries),
        })
    }
}

#[async_trait]
impl PanelSource for HttpSource {
    fn describe(&self) -> String {
        self.url.clone()
    }

    async fn fetch(&self) -> Result<String> {
        fetch_with_backoff(&self.backoff, &self.url, || self.get_once()).await
    }
}

impl HttpSource {
    async fn get_once(&self) -> std::result::Result<String, FetchFailure> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(FetchFailure::transient)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchFailure::from_status(&self.url, status));
        }
        resp.text().await.map_err(FetchFailure::transient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn file_source_reads_and_describes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("panel.csv");
        std::fs::write(&path, "provider_id\n1\n").unwrap();
        let src = FileSource::new(&path);
        assert_eq!(src.fetch().await.unwrap(), "provider_id\n1\n");
        assert!(src.describe().ends_with("panel.csv"));
    }

    #[tokio::test]
    async fn file_source_missing_is_error() {
        let src = FileSource::new("/nonexistent/riskpanel/panel.csv");
        let err = src.fetch().await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/riskpanel/panel.csv"));
    }
}
