//! Downloading provider-hosted results so they can be re-hosted.

use std::time::Duration;

use genbatch_core::store::StorageError;

/// Generated videos can be large; allow a slow CDN time to deliver.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Plain HTTP(S) downloader shared by the media store backends.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(concat!("genbatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { http })
    }

    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::Download(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Download(format!("{url}: HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::Download(format!("{url}: {e}")))?;
        tracing::debug!(url, bytes = bytes.len(), "Downloaded result");
        Ok(bytes.to_vec())
    }
}
