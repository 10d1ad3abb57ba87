//! Source provider for monthly trip files

use std::time::Duration;

use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tracing::{info, warn};

use crate::batch;
use crate::config::SourceConfig;
use crate::error::{IngestError, Result};
use crate::key::IngestionKey;

/// Fetches the raw monthly batch for an ingestion key.
///
/// Implementations must not be invoked for a key whose month is already
/// stored; the reconciler short-circuits before any fetch.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch(&self, key: &IngestionKey) -> Result<RecordBatch>;
}

#[async_trait]
impl<P: SourceProvider + ?Sized> SourceProvider for std::sync::Arc<P> {
    async fn fetch(&self, key: &IngestionKey) -> Result<RecordBatch> {
        (**self).fetch(key).await
    }
}

/// HTTP provider reading the upstream host's monthly parquet files.
pub struct HttpSource {
    client: Client,
    config: SourceConfig,
}

impl HttpSource {
    /// Create a new provider with the given configuration.
    pub fn new(config: SourceConfig) -> anyhow::Result<Self> {
        config.validate()?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("tripdata-ingest/0.1")
            .build()?;

        Ok(HttpSource { client, config })
    }

    /// URL of one month's file.
    ///
    /// The path shape `{category}_tripdata_{year}-{month:02}.{format}` is a
    /// compatibility contract with the upstream data host.
    pub fn file_url(&self, key: &IngestionKey) -> String {
        format!(
            "{}/{}_tripdata_{}-{:02}.{}",
            self.config.base_url, key.category, key.year, key.month, self.config.file_format
        )
    }

    /// Download a URL with retry and exponential backoff.
    async fn download_with_retry(&self, url: &str) -> Result<Bytes> {
        let mut last_error =
            IngestError::SourceUnavailable(format!("no download attempt made for {url}"));

        for attempt in 1..=self.config.max_retries {
            match self.download(url).await {
                Ok(payload) => return Ok(payload),
                Err(e) => {
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        error = %e,
                        "download attempt failed"
                    );
                    last_error = e;

                    if attempt < self.config.max_retries {
                        let backoff_secs = 2u64.pow(attempt);
                        tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                    }
                },
            }
        }

        Err(last_error)
    }

    /// Download a URL once.
    async fn download(&self, url: &str) -> Result<Bytes> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(IngestError::SourceUnavailable(format!(
                "HTTP {} fetching {}",
                response.status(),
                url
            )));
        }

        Ok(response.bytes().await?)
    }

    /// Get configuration
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

#[async_trait]
impl SourceProvider for HttpSource {
    async fn fetch(&self, key: &IngestionKey) -> Result<RecordBatch> {
        let url = self.file_url(key);
        info!(%key, %url, "downloading monthly trip file");

        let payload = self.download_with_retry(&url).await?;
        info!(%key, bytes = payload.len(), "downloaded monthly trip file");

        let raw = batch::batch_from_parquet(payload)?;
        batch::lowercase_columns(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Category;

    #[test]
    fn test_source_creation() {
        let source = HttpSource::new(SourceConfig::default());
        assert!(source.is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = SourceConfig::default();
        config.base_url = String::new();
        assert!(HttpSource::new(config).is_err());
    }

    #[test]
    fn test_file_url_shape() {
        let source = HttpSource::new(SourceConfig::default()).unwrap();
        let key = IngestionKey::new(Category::Yellow, 2022, 3).unwrap();
        assert_eq!(
            source.file_url(&key),
            "https://d37ci6vzurychx.cloudfront.net/trip-data/yellow_tripdata_2022-03.parquet"
        );
    }

    #[test]
    fn test_file_url_pads_month() {
        let mut config = SourceConfig::default();
        config.base_url = "http://localhost:8080/trip-data".to_string();
        let source = HttpSource::new(config).unwrap();

        let key = IngestionKey::new(Category::Green, 2021, 11).unwrap();
        assert_eq!(
            source.file_url(&key),
            "http://localhost:8080/trip-data/green_tripdata_2021-11.parquet"
        );
    }
}
