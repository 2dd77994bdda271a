//! Validated HTTP fetching into scratch storage.
//!
//! Only http/https URLs with image/video content types are accepted. The
//! download streams to disk under the size cap; oversized or timed-out
//! fetches leave no partial file behind.

use std::path::PathBuf;
use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{MediaError, MediaResult};
use crate::scratch::ScratchDir;

/// Default payload cap: 500 MiB, matching the largest target video accepted
/// upstream.
const DEFAULT_MAX_FETCH_SIZE: u64 = 500 * 1024 * 1024;

/// Default per-fetch timeout.
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Fetcher configuration.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Maximum accepted payload size in bytes
    pub max_size: u64,
    /// Per-fetch timeout
    pub timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_FETCH_SIZE,
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

impl FetcherConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_size: std::env::var("MAX_FETCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_MAX_FETCH_SIZE),
            timeout: Duration::from_secs(
                std::env::var("FETCH_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            ),
        }
    }
}

/// HTTP media fetcher.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Download a media file into the scratch directory as `file_name`.
    ///
    /// Validates the URL scheme and the response content type before any
    /// byte hits the disk.
    pub async fn fetch_media(
        &self,
        url: &str,
        scratch: &ScratchDir,
        file_name: &str,
    ) -> MediaResult<PathBuf> {
        let dest = scratch.file(file_name);

        let result = tokio::time::timeout(
            self.config.timeout,
            self.fetch_inner(url, &dest, true),
        )
        .await;

        match result {
            Ok(Ok(path)) => Ok(path),
            Ok(Err(e)) => {
                remove_partial(&dest).await;
                Err(e)
            }
            Err(_) => {
                remove_partial(&dest).await;
                Err(MediaError::Timeout(self.config.timeout.as_secs()))
            }
        }
    }

    /// Fetch a small text resource (e.g. a mapping file).
    ///
    /// Content-type restrictions do not apply; the size cap and the timeout
    /// do.
    pub async fn fetch_text(&self, url: &str) -> MediaResult<String> {
        validate_scheme(url)?;

        let response = tokio::time::timeout(self.config.timeout, async {
            self.client
                .get(url)
                .send()
                .await
                .map_err(|e| MediaError::unreachable(e.to_string()))?
                .error_for_status()
                .map_err(|e| MediaError::unreachable(e.to_string()))
        })
        .await
        .map_err(|_| MediaError::Timeout(self.config.timeout.as_secs()))??;

        if let Some(len) = response.content_length() {
            if len > self.config.max_size {
                return Err(MediaError::TooLarge {
                    size: len,
                    limit: self.config.max_size,
                });
            }
        }

        let body = tokio::time::timeout(self.config.timeout, response.text())
            .await
            .map_err(|_| MediaError::Timeout(self.config.timeout.as_secs()))?
            .map_err(|e| MediaError::unreachable(e.to_string()))?;

        Ok(body)
    }

    async fn fetch_inner(
        &self,
        url: &str,
        dest: &PathBuf,
        check_content_type: bool,
    ) -> MediaResult<PathBuf> {
        validate_scheme(url)?;

        debug!("Fetching {} to {}", url, dest.display());

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MediaError::unreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| MediaError::unreachable(e.to_string()))?;

        if check_content_type {
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();
            validate_content_type(&content_type)?;
        }

        // Reject oversized payloads up front when the server declares a length.
        if let Some(len) = response.content_length() {
            if len > self.config.max_size {
                return Err(MediaError::TooLarge {
                    size: len,
                    limit: self.config.max_size,
                });
            }
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MediaError::unreachable(e.to_string()))?;
            written += chunk.len() as u64;
            if written > self.config.max_size {
                return Err(MediaError::TooLarge {
                    size: written,
                    limit: self.config.max_size,
                });
            }
            tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await?;
        }

        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        drop(file);

        info!(
            url = %url,
            size_bytes = written,
            "Fetched media to {}",
            dest.display()
        );

        Ok(dest.clone())
    }
}

/// Only http/https references are resolvable.
fn validate_scheme(url: &str) -> MediaResult<()> {
    let parsed =
        Url::parse(url).map_err(|e| MediaError::unreachable(format!("invalid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(MediaError::unreachable(format!(
            "unsupported URL scheme '{other}'"
        ))),
    }
}

/// Accept image/* and video/* payloads only.
fn validate_content_type(content_type: &str) -> MediaResult<()> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if essence.starts_with("image/") || essence.starts_with("video/") {
        Ok(())
    } else {
        Err(MediaError::invalid_type(if essence.is_empty() {
            "missing content type".to_string()
        } else {
            essence
        }))
    }
}

async fn remove_partial(path: &PathBuf) {
    if path.exists() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Failed to remove partial download {}: {}", path.display(), e);
        }
    }
}
