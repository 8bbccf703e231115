use async_trait::async_trait;
use std::time::Duration;

use crate::errors::{AppError, AppResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Fetches recorded audio by URL. Recordings are uploaded by the client app
/// to object storage; workers only ever read them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn fetch_audio(&self, url: &str) -> AppResult<Vec<u8>>;
}

pub struct HttpBlobStore {
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch_audio(&self, url: &str) -> AppResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::GatewayError(format!("audio fetch {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::GatewayError(format!(
                "audio fetch {} returned {}",
                url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::GatewayError(format!("audio fetch {}: {}", url, e)))?;
        if bytes.is_empty() {
            return Err(AppError::GatewayError(format!(
                "audio fetch {} returned an empty body",
                url
            )));
        }
        Ok(bytes.to_vec())
    }
}
