//! Google Cloud Storage backend via the JSON upload API.
//!
//! Uses the ambient credential chain (metadata server, service-account
//! file) through gcp_auth rather than a vendored GCS client.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use tracing::{debug, info};

use crate::backend::{validate_key, StorageBackend};
use crate::error::{StorageError, StorageResult};

const GCS_SCOPE: &[&str] = &["https://www.googleapis.com/auth/devstorage.read_write"];

/// Configuration for the GCS backend.
#[derive(Debug, Clone)]
pub struct GcsConfig {
    /// Bucket name
    pub bucket_name: String,
    /// Optional CDN URL fronting the bucket
    pub cdn_url: Option<String>,
}

impl GcsConfig {
    /// Create config from environment variables. Returns None when the
    /// backend is not configured.
    pub fn from_env() -> StorageResult<Option<Self>> {
        let bucket_name = match std::env::var("GCS_BUCKET_NAME") {
            Ok(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let cdn_url = std::env::var("CDN_URL").ok().filter(|v| !v.is_empty());
        Ok(Some(Self {
            bucket_name,
            cdn_url,
        }))
    }
}

/// Google Cloud Storage backend.
#[derive(Clone)]
pub struct GcsBackend {
    client: reqwest::Client,
    token_provider: Arc<dyn TokenProvider>,
    bucket: String,
    cdn_url: Option<String>,
}

impl GcsBackend {
    /// Create a backend, resolving credentials from the environment.
    pub async fn new(config: GcsConfig) -> StorageResult<Self> {
        let token_provider = gcp_auth::provider()
            .await
            .map_err(|e| StorageError::auth_failed(e.to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            token_provider,
            bucket: config.bucket_name,
            cdn_url: config.cdn_url.map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn public_url(&self, key: &str) -> String {
        match &self.cdn_url {
            Some(cdn) => format!("{cdn}/{key}"),
            None => format!("https://storage.googleapis.com/{}/{}", self.bucket, key),
        }
    }
}

#[async_trait]
impl StorageBackend for GcsBackend {
    fn name(&self) -> &'static str {
        "gcs"
    }

    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        debug!("Uploading {} to gcs:{}", path.display(), key);

        let token = self
            .token_provider
            .token(GCS_SCOPE)
            .await
            .map_err(|e| StorageError::auth_failed(e.to_string()))?;

        let body = tokio::fs::read(path).await?;
        let upload_url = format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.bucket,
            urlencoding::encode(key)
        );

        let response = self
            .client
            .post(&upload_url)
            .bearer_auth(token.as_str())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::upload_failed(format!(
                "GCS responded {status}: {text}"
            )));
        }

        let url = self.public_url(key);
        info!("Uploaded {} to {}", path.display(), url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn object_name_is_urlencoded() {
        let encoded = urlencoding::encode("outputs/job 1.mp4");
        assert_eq!(encoded, "outputs%2Fjob%201.mp4");
    }
}
