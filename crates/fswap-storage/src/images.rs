//! Cloudflare Images backend.
//!
//! Only still-image artifacts belong here. The API assigns the image id we
//! request (the key without its extension) and serves through the delivery
//! domain.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::backend::{validate_key, StorageBackend};
use crate::error::{StorageError, StorageResult};

/// Configuration for the Cloudflare Images backend.
#[derive(Debug, Clone)]
pub struct CloudflareImagesConfig {
    /// Cloudflare account id
    pub account_id: String,
    /// API token with Images write permission
    pub api_token: String,
    /// Delivery domain; defaults to imagedelivery.net
    pub delivery_domain: String,
    /// Variant name to serve
    pub variant: String,
}

impl CloudflareImagesConfig {
    /// Create config from environment variables. Returns None when the
    /// backend is not configured.
    pub fn from_env() -> StorageResult<Option<Self>> {
        let account_id = match std::env::var("CF_IMAGES_ACCOUNT_ID") {
            Ok(v) if !v.is_empty() => v,
            _ => return Ok(None),
        };
        let api_token = std::env::var("CF_IMAGES_API_TOKEN")
            .map_err(|_| StorageError::config_error("CF_IMAGES_API_TOKEN not set"))?;
        let delivery_domain = std::env::var("CF_IMAGES_DELIVERY_DOMAIN")
            .unwrap_or_else(|_| format!("https://imagedelivery.net/{account_id}"));
        let variant = std::env::var("CF_IMAGES_VARIANT").unwrap_or_else(|_| "public".to_string());
        Ok(Some(Self {
            account_id,
            api_token,
            delivery_domain,
            variant,
        }))
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    success: bool,
    #[serde(default)]
    result: Option<UploadResult>,
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Cloudflare Images storage backend.
#[derive(Clone)]
pub struct CloudflareImagesBackend {
    client: reqwest::Client,
    api_base: String,
    api_token: String,
    delivery_domain: String,
    variant: String,
}

impl CloudflareImagesBackend {
    /// Create a backend from configuration.
    pub fn new(config: CloudflareImagesConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: format!(
                "https://api.cloudflare.com/client/v4/accounts/{}/images/v1",
                config.account_id
            ),
            api_token: config.api_token,
            delivery_domain: config.delivery_domain.trim_end_matches('/').to_string(),
            variant: config.variant,
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Image id is the key without directories or extension.
    fn image_id(key: &str) -> String {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        match file_name.rsplit_once('.') {
            Some((stem, _)) => stem.to_string(),
            None => file_name.to_string(),
        }
    }
}

#[async_trait]
impl StorageBackend for CloudflareImagesBackend {
    fn name(&self) -> &'static str {
        "images"
    }

    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        validate_key(key)?;
        if !content_type.starts_with("image/") {
            return Err(StorageError::InvalidKey(format!(
                "Cloudflare Images only accepts images, got {content_type}"
            )));
        }

        let image_id = Self::image_id(key);
        debug!("Uploading {} as image id {}", path.display(), image_id);

        let data = tokio::fs::read(path).await?;
        let part = reqwest::multipart::Part::bytes(data)
            .file_name("image")
            .mime_str(content_type)
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("id", image_id.clone())
            .text("requireSignedURLs", "false");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StorageError::upload_failed(format!(
                "Cloudflare Images responded {status}: {text}"
            )));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        if !parsed.success {
            let message = parsed
                .errors
                .first()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "unknown API error".to_string());
            return Err(StorageError::upload_failed(message));
        }

        let id = parsed
            .result
            .map(|r| r.id)
            .unwrap_or(image_id);
        let url = format!("{}/{}/{}", self.delivery_domain, id, self.variant);
        info!("Uploaded {} to {}", path.display(), url);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn image_id_strips_directories_and_extension() {
        assert_eq!(CloudflareImagesBackend::image_id("outputs/job1.jpg"), "job1");
        assert_eq!(CloudflareImagesBackend::image_id("poster"), "poster");
        assert_eq!(CloudflareImagesBackend::image_id("a/b/c.webp"), "c");
    }

    fn backend(api_base: String) -> CloudflareImagesBackend {
        CloudflareImagesBackend::new(CloudflareImagesConfig {
            account_id: "acct".to_string(),
            api_token: "token".to_string(),
            delivery_domain: "https://imagedelivery.net/acct".to_string(),
            variant: "public".to_string(),
        })
        .with_api_base(api_base)
    }

    #[tokio::test]
    async fn upload_returns_delivery_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/images/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "result": { "id": "job1_poster" },
                "errors": []
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("job1_poster.jpg");
        std::fs::write(&file, b"jpeg bytes").unwrap();

        let backend = backend(format!("{}/images/v1", server.uri()));
        let url = backend
            .upload_file(&file, "outputs/job1_poster.jpg", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(url, "https://imagedelivery.net/acct/job1_poster/public");
    }

    #[tokio::test]
    async fn non_image_content_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"video").unwrap();

        let backend = backend("http://unused".to_string());
        let err = backend
            .upload_file(&file, "outputs/clip.mp4", "video/mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn api_level_failure_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/images/v1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "errors": [{ "message": "quota exceeded" }]
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.jpg");
        std::fs::write(&file, b"jpeg").unwrap();

        let backend = backend(format!("{}/images/v1", server.uri()));
        let err = backend
            .upload_file(&file, "x.jpg", "image/jpeg")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }
}
