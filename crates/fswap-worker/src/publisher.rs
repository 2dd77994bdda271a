//! Result publishing.
//!
//! Derives preview formats from the primary artifact and uploads everything
//! to every configured backend with bounded retries. One backend accepting
//! the primary artifact is enough for the job to succeed; individual
//! backend failures are logged and tolerated.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use fswap_media::{derive_previews, extract_poster, DerivedArtifact, FfmpegRunner, ScratchDir};
use fswap_models::{JobId, MediaType, ResultUrls};
use fswap_storage::StorageBackend;

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async_if, RetryConfig};

/// Key every publisher result carries for the primary artifact.
pub const PRIMARY_FORMAT: &str = "original_url";

pub struct ResultPublisher {
    backends: Vec<Arc<dyn StorageBackend>>,
    runner: FfmpegRunner,
}

impl ResultPublisher {
    pub fn new(backends: Vec<Arc<dyn StorageBackend>>, runner: FfmpegRunner) -> Self {
        Self { backends, runner }
    }

    /// Build the artifact set for a finished job: the primary plus derived
    /// previews. Preview derivation failures degrade, never abort.
    pub async fn derive_artifacts(
        &self,
        job_id: &JobId,
        media_type: MediaType,
        primary: &Path,
        preview_source: Option<&Path>,
        scratch: &ScratchDir,
    ) -> Vec<DerivedArtifact> {
        let mut artifacts = vec![DerivedArtifact {
            format_name: PRIMARY_FORMAT.to_string(),
            path: primary.to_path_buf(),
            content_type: primary_content_type(media_type).to_string(),
        }];

        if let Some(mp4) = preview_source {
            for result in derive_previews(&self.runner, mp4, scratch.path(), job_id.as_str()).await
            {
                match result {
                    Ok(artifact) => artifacts.push(artifact),
                    Err(e) => warn!(job_id = %job_id, "Preview derivation failed: {}", e),
                }
            }
        } else {
            // Still images get a poster frame only.
            let poster_path = scratch.file(&format!("{}_poster.jpg", job_id.as_str()));
            match extract_poster(&self.runner, primary, &poster_path).await {
                Ok(path) => artifacts.push(DerivedArtifact {
                    format_name: "poster_url".to_string(),
                    path,
                    content_type: "image/jpeg".to_string(),
                }),
                Err(e) => warn!(job_id = %job_id, "Poster derivation failed: {}", e),
            }
        }

        artifacts
    }

    /// Upload artifacts to every backend.
    ///
    /// Returns the format-name to URL map (first successful backend wins
    /// per format). Failing to place the primary artifact anywhere is a
    /// `Publish` error; anything less is partial degradation.
    pub async fn publish_artifacts(
        &self,
        job_id: &JobId,
        artifacts: &[DerivedArtifact],
    ) -> WorkerResult<ResultUrls> {
        let mut urls = ResultUrls::default();

        for artifact in artifacts {
            let file_name = artifact
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| job_id.to_string());
            let key = format!("outputs/{}/{}", job_id.as_str(), file_name);

            let mut placed = false;
            for backend in &self.backends {
                let retry = RetryConfig {
                    max_attempts: 3,
                    base_delay: Duration::from_millis(500),
                    max_delay: Duration::from_secs(10),
                    operation_name: format!("upload:{}:{}", backend.name(), artifact.format_name),
                };
                let result = retry_async_if(
                    &retry,
                    || backend.upload_file(&artifact.path, &key, &artifact.content_type),
                    |e| e.is_retryable(),
                )
                .await;

                match result {
                    Ok(url) => {
                        if !placed {
                            urls.insert(&artifact.format_name, url.clone());
                        }
                        placed = true;
                        info!(
                            job_id = %job_id,
                            backend = backend.name(),
                            format = %artifact.format_name,
                            "Published {}",
                            url
                        );
                    }
                    Err(e) => {
                        warn!(
                            job_id = %job_id,
                            backend = backend.name(),
                            format = %artifact.format_name,
                            "Upload failed: {}",
                            e
                        );
                    }
                }
            }

            if !placed && artifact.format_name == PRIMARY_FORMAT {
                return Err(WorkerError::publish(format!(
                    "primary artifact rejected by all {} backend(s)",
                    self.backends.len()
                )));
            }
        }

        if urls.is_empty() {
            return Err(WorkerError::publish("no artifact was published"));
        }
        Ok(urls)
    }
}

fn primary_content_type(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "image/jpeg",
        MediaType::Video => "video/mp4",
        MediaType::Gif => "image/gif",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fswap_storage::StorageError;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticBackend {
        name: &'static str,
        fail: bool,
        permanent: bool,
        calls: AtomicU32,
    }

    impl StaticBackend {
        fn ok(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: false,
                permanent: false,
                calls: AtomicU32::new(0),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: true,
                permanent: false,
                calls: AtomicU32::new(0),
            })
        }

        fn rejecting(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                fail: true,
                permanent: true,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl StorageBackend for StaticBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn upload_file(
            &self,
            _path: &Path,
            key: &str,
            _content_type: &str,
        ) -> Result<String, StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                if self.permanent {
                    Err(StorageError::config_error("bucket not configured"))
                } else {
                    Err(StorageError::upload_failed("backend down"))
                }
            } else {
                Ok(format!("https://{}.example.com/{key}", self.name))
            }
        }
    }

    fn artifact(dir: &Path, name: &str, format: &str) -> DerivedArtifact {
        let path = dir.join(name);
        std::fs::write(&path, b"bytes").unwrap();
        DerivedArtifact {
            format_name: format.to_string(),
            path,
            content_type: "image/jpeg".to_string(),
        }
    }

    fn publisher(backends: Vec<Arc<dyn StorageBackend>>) -> ResultPublisher {
        ResultPublisher::new(backends, FfmpegRunner::new())
    }

    #[tokio::test(start_paused = true)]
    async fn one_healthy_backend_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        let good = StaticBackend::ok("good");
        let bad = StaticBackend::failing("bad");
        let publisher = publisher(vec![bad.clone(), good.clone()]);

        let job_id = JobId::from_string("job-1");
        let artifacts = vec![artifact(dir.path(), "out.jpg", PRIMARY_FORMAT)];
        let urls = publisher
            .publish_artifacts(&job_id, &artifacts)
            .await
            .unwrap();

        assert_eq!(
            urls.get(PRIMARY_FORMAT),
            Some("https://good.example.com/outputs/job-1/out.jpg")
        );
        // The failing backend was retried to exhaustion.
        assert_eq!(bad.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_backend_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let good = StaticBackend::ok("good");
        let misconfigured = StaticBackend::rejecting("misconfigured");
        let publisher = publisher(vec![misconfigured.clone(), good.clone()]);

        let job_id = JobId::from_string("job-5");
        let artifacts = vec![artifact(dir.path(), "out.jpg", PRIMARY_FORMAT)];
        let urls = publisher
            .publish_artifacts(&job_id, &artifacts)
            .await
            .unwrap();

        assert_eq!(
            urls.get(PRIMARY_FORMAT),
            Some("https://good.example.com/outputs/job-5/out.jpg")
        );
        // A configuration error gets a single attempt, no backoff.
        assert_eq!(misconfigured.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_backends_failing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher(vec![StaticBackend::failing("a"), StaticBackend::failing("b")]);

        let job_id = JobId::from_string("job-2");
        let artifacts = vec![artifact(dir.path(), "out.jpg", PRIMARY_FORMAT)];
        let err = publisher
            .publish_artifacts(&job_id, &artifacts)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Publish(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn preview_failure_does_not_block_primary() {
        let dir = tempfile::tempdir().unwrap();
        let good = StaticBackend::ok("good");
        let publisher = publisher(vec![good]);

        let job_id = JobId::from_string("job-3");
        // Preview artifact path points at a file that exists; the backend
        // accepts both, so both formats publish.
        let artifacts = vec![
            artifact(dir.path(), "out.jpg", PRIMARY_FORMAT),
            artifact(dir.path(), "out_poster.jpg", "poster_url"),
        ];
        let urls = publisher
            .publish_artifacts(&job_id, &artifacts)
            .await
            .unwrap();
        assert_eq!(urls.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_backend_in_order_wins_the_url() {
        let dir = tempfile::tempdir().unwrap();
        let first = StaticBackend::ok("first");
        let second = StaticBackend::ok("second");
        let publisher = publisher(vec![first, second.clone()]);

        let job_id = JobId::from_string("job-4");
        let artifacts = vec![artifact(dir.path(), "out.jpg", PRIMARY_FORMAT)];
        let urls = publisher
            .publish_artifacts(&job_id, &artifacts)
            .await
            .unwrap();
        assert!(urls.get(PRIMARY_FORMAT).unwrap().starts_with("https://first"));
        // Every backend still receives the artifact.
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }
}
