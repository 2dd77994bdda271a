//! The processing pipeline.
//!
//! One call per job: fetch media, resolve faces, run the engine, publish
//! results, persist the primary artifact, and record the outcome. Status
//! transitions stay monotonic through every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{error, info, warn};

use fswap_engine::{EngineError, EngineInvocation, EngineInvoker};
use fswap_media::{check_ffmpeg, persist_output, Fetcher, FetcherConfig, FfmpegRunner, ScratchDir};
use fswap_models::{Job, MediaType, ProcessOutcome, ResultUrls};
use fswap_storage::{configured_backends, StorageBackend, StorageSettings};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::governor::Governor;
use crate::publisher::ResultPublisher;
use crate::resolver::MappingResolver;
use crate::stats::StatsRegistry;

/// Shared context for job processing.
pub struct ProcessingContext {
    pub config: WorkerConfig,
    pub governor: Governor,
    pub stats: Arc<StatsRegistry>,
    fetcher: Fetcher,
    resolver: MappingResolver,
    invoker: EngineInvoker,
    publisher: ResultPublisher,
    runner: FfmpegRunner,
}

impl ProcessingContext {
    /// Build the context from configuration and the environment.
    pub async fn new(config: WorkerConfig) -> WorkerResult<Self> {
        check_ffmpeg()?;

        tokio::fs::create_dir_all(&config.work_dir).await?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        let backends = configured_backends(StorageSettings::from_env()?).await?;
        let invoker = EngineInvoker::new(&config.engine_bin, config.job_timeout.as_secs())?;
        Ok(Self::from_parts(config, backends, invoker))
    }

    /// Assemble from explicit components.
    pub fn from_parts(
        config: WorkerConfig,
        backends: Vec<Arc<dyn StorageBackend>>,
        invoker: EngineInvoker,
    ) -> Self {
        let governor = Governor::new(config.governor_config());
        let fetcher = Fetcher::new(FetcherConfig::from_env());
        let runner = FfmpegRunner::new().with_timeout(config.job_timeout.as_secs());
        Self {
            governor,
            stats: Arc::new(StatsRegistry::new()),
            fetcher: fetcher.clone(),
            resolver: MappingResolver::new(fetcher),
            invoker,
            publisher: ResultPublisher::new(backends, runner.clone()),
            runner,
            config,
        }
    }

    /// Run a job to a terminal state.
    ///
    /// The caller holds the governor slot; this method never blocks on
    /// admission. On success the job is `Succeeded` and the outcome carries
    /// the published URLs; on `Err` the job is already `Failed` or
    /// `TimedOut` and the error is returned for retry classification. Use
    /// [`failure_outcome`] to turn the error into a response payload.
    pub async fn execute(&self, job: &mut Job) -> Result<ProcessOutcome, WorkerError> {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            media_type = job.media_type.as_str(),
            mode = job.selector_mode.as_str(),
            "Processing job"
        );
        job.advance(fswap_models::JobStatus::Running);

        let result = tokio::time::timeout(self.config.job_timeout, self.run_pipeline(job)).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(Ok(urls)) => {
                job.succeed(urls.clone());
                self.stats.record_success(elapsed);
                info!(job_id = %job.id, elapsed_secs = format!("{elapsed:.2}"), "Job succeeded");
                Ok(ProcessOutcome::success(urls, elapsed))
            }
            Ok(Err(e)) if e.is_timeout() => {
                job.time_out(e.to_string());
                self.stats.record_timeout(elapsed);
                warn!(job_id = %job.id, "Job timed out: {}", e);
                Err(e)
            }
            Ok(Err(e)) => {
                job.fail(e.to_string());
                self.stats.record_failure(elapsed);
                error!(job_id = %job.id, "Job failed: {}", e);
                Err(e)
            }
            Err(_) => {
                let message = format!(
                    "job exceeded the {}s processing timeout",
                    self.config.job_timeout.as_secs()
                );
                job.time_out(&message);
                self.stats.record_timeout(elapsed);
                warn!(job_id = %job.id, "{}", message);
                Err(WorkerError::DeadlineExceeded)
            }
        }
    }

    async fn run_pipeline(&self, job: &Job) -> WorkerResult<ResultUrls> {
        if job.past_deadline(Utc::now()) {
            return Err(WorkerError::DeadlineExceeded);
        }

        let scratch = ScratchDir::new(&self.config.work_dir, &format!("job_{}_", job.id))?;

        let resolved = self.resolver.resolve(job, &scratch).await?;

        let target_name = format!("target.{}", target_extension(job.media_type));
        let target_path = self
            .fetcher
            .fetch_media(&job.target_url, &scratch, &target_name)
            .await?;

        // Animated gifs run through the engine as plain video.
        let engine_target = if job.media_type == MediaType::Gif {
            fswap_media::gif_to_mp4(&self.runner, &target_path, scratch.file("target.mp4")).await?
        } else {
            target_path
        };

        let engine_out_ext = if job.media_type.is_animated() {
            "mp4"
        } else {
            "jpg"
        };
        let engine_output = scratch.file(&format!("engine_out.{engine_out_ext}"));

        self.invoker
            .invoke(&EngineInvocation {
                selector_mode: resolved.selector_mode,
                source_paths: resolved.source_paths,
                mapping_path: resolved.mapping_path,
                target_path: engine_target,
                output_path: engine_output.clone(),
                processors: job.processors.clone(),
                resolution: job.resolution,
            })
            .await?;

        // Gif targets convert back from the engine's mp4.
        let (primary, preview_source): (PathBuf, Option<PathBuf>) = match job.media_type {
            MediaType::Gif => {
                let gif = fswap_media::mp4_to_gif(
                    &self.runner,
                    &engine_output,
                    scratch.file("primary.gif"),
                )
                .await?;
                (gif, Some(engine_output))
            }
            MediaType::Video => (engine_output.clone(), Some(engine_output)),
            MediaType::Image => (engine_output, None),
        };

        let artifacts = self
            .publisher
            .derive_artifacts(
                &job.id,
                job.media_type,
                &primary,
                preview_source.as_deref(),
                &scratch,
            )
            .await;
        let urls = self.publisher.publish_artifacts(&job.id, &artifacts).await?;

        let final_name = format!("{}.{}", job.id, job.media_type.artifact_extension());
        persist_output(&primary, &self.config.output_dir, &final_name).await?;

        Ok(urls)
    }
}

fn target_extension(media_type: MediaType) -> &'static str {
    match media_type {
        MediaType::Image => "jpg",
        MediaType::Video => "mp4",
        MediaType::Gif => "gif",
    }
}

/// Build the error response for a failed execution.
pub fn failure_outcome(error: &WorkerError, job: &Job) -> ProcessOutcome {
    ProcessOutcome::error(error.to_string(), diagnostic_of(error), job.processing_time())
}

fn diagnostic_of(error: &WorkerError) -> Option<String> {
    match error {
        WorkerError::Engine(EngineError::Failed {
            stderr: Some(stderr),
            ..
        }) => Some(stderr.clone()),
        WorkerError::Media(fswap_media::MediaError::FfmpegFailed {
            stderr: Some(stderr),
            ..
        }) => Some(stderr.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fswap_models::{JobStatus, Processor, Resolution, SwapRequest};
    use fswap_storage::StorageError;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use wiremock::matchers::{method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct MemoryBackend;

    #[async_trait]
    impl StorageBackend for MemoryBackend {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn upload_file(
            &self,
            _path: &Path,
            key: &str,
            _content_type: &str,
        ) -> Result<String, StorageError> {
            Ok(format!("https://cdn.example.com/{key}"))
        }
    }

    fn fake_engine(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-engine");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn context(work: &Path, engine: &Path) -> ProcessingContext {
        context_with_timeout(work, engine, WorkerConfig::default().job_timeout)
    }

    fn context_with_timeout(
        work: &Path,
        engine: &Path,
        job_timeout: std::time::Duration,
    ) -> ProcessingContext {
        let config = WorkerConfig {
            work_dir: work.join("work").to_string_lossy().to_string(),
            output_dir: work.join("outputs").to_string_lossy().to_string(),
            engine_bin: engine.to_string_lossy().to_string(),
            job_timeout,
            ..WorkerConfig::default()
        };
        std::fs::create_dir_all(&config.work_dir).unwrap();
        std::fs::create_dir_all(&config.output_dir).unwrap();
        let invoker = EngineInvoker::new(engine, config.job_timeout.as_secs()).unwrap();
        ProcessingContext::from_parts(config, vec![Arc::new(MemoryBackend)], invoker)
    }

    async fn image_job(server: &MockServer) -> Job {
        for at in ["/face.jpg", "/target.jpg"] {
            Mock::given(method("GET"))
                .and(url_path(at.to_string()))
                .respond_with(
                    ResponseTemplate::new(200)
                        .insert_header("content-type", "image/jpeg")
                        .set_body_bytes(vec![0u8; 32]),
                )
                .mount(server)
                .await;
        }
        let request: SwapRequest = serde_json::from_value(serde_json::json!({
            "media_type": "image",
            "source_url": format!("{}/face.jpg", server.uri()),
            "target_url": format!("{}/target.jpg", server.uri()),
        }))
        .unwrap();
        request.into_job().unwrap()
    }

    #[tokio::test]
    async fn image_job_runs_to_success() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        // The fake engine writes its output path (the argument after
        // --output) and exits cleanly.
        let engine = fake_engine(
            dir.path(),
            r#"out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "--output" ]; then out="$2"; fi
  shift
done
echo swapped > "$out""#,
        );
        let ctx = context(dir.path(), &engine);
        let mut job = image_job(&server).await;

        let outcome = ctx.execute(&mut job).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.result_urls.get("original_url").is_some());

        // Primary artifact persisted under the output directory.
        let persisted = std::path::Path::new(&ctx.config.output_dir)
            .join(format!("{}.jpg", job.id));
        assert!(persisted.exists());

        let snap = ctx.stats.snapshot();
        assert_eq!(snap.succeeded, 1);
    }

    #[tokio::test]
    async fn engine_failure_fails_the_job_with_diagnostic() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "echo 'model missing' >&2\nexit 2");
        let ctx = context(dir.path(), &engine);
        let mut job = image_job(&server).await;

        let err = ctx.execute(&mut job).await.unwrap_err();
        assert_eq!(job.status, JobStatus::Failed);
        let outcome = failure_outcome(&err, &job);
        assert_eq!(outcome.status, "error");
        assert!(outcome.traceback.unwrap().contains("model missing"));
        assert_eq!(ctx.stats.snapshot().failed, 1);
    }

    #[tokio::test]
    async fn expired_deadline_times_out_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "exit 0");
        let ctx = context(dir.path(), &engine);

        let mut job = Job::new(
            MediaType::Image,
            vec!["https://cdn.example.com/face.jpg".to_string()],
            "https://cdn.example.com/target.jpg",
            Resolution::default(),
            vec![Processor::FaceSwapper],
        );
        job.timeout_at = Some(Utc::now() - chrono::Duration::seconds(1));

        let err = ctx.execute(&mut job).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(job.status, JobStatus::TimedOut);
        assert_eq!(ctx.stats.snapshot().timed_out, 1);
    }

    #[tokio::test]
    async fn timed_out_job_kills_the_engine() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        // If the engine survived the timeout it would drop this marker once
        // its sleep finishes.
        let marker = dir.path().join("engine_finished");
        let engine = fake_engine(
            dir.path(),
            &format!("sleep 3\ntouch {}", marker.display()),
        );
        let ctx = context_with_timeout(dir.path(), &engine, std::time::Duration::from_secs(1));
        let mut job = image_job(&server).await;

        let err = ctx.execute(&mut job).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(job.status, JobStatus::TimedOut);

        tokio::time::sleep(std::time::Duration::from_secs(3)).await;
        assert!(!marker.exists(), "engine process outlived the job timeout");
    }

    #[tokio::test]
    async fn unreachable_target_fails_the_job() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let engine = fake_engine(dir.path(), "exit 0");
        let ctx = context(dir.path(), &engine);

        Mock::given(method("GET"))
            .and(url_path("/face.jpg"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0u8; 32]),
            )
            .mount(&server)
            .await;

        let request: SwapRequest = serde_json::from_value(serde_json::json!({
            "media_type": "image",
            "source_url": format!("{}/face.jpg", server.uri()),
            "target_url": "http://127.0.0.1:1/target.jpg",
        }))
        .unwrap();
        let mut job = request.into_job().unwrap();

        let err = ctx.execute(&mut job).await.unwrap_err();
        assert!(matches!(err, WorkerError::Media(_)));
        assert_eq!(job.status, JobStatus::Failed);
    }
}
