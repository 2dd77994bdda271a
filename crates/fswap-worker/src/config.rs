//! Worker configuration.

use std::time::Duration;

use crate::governor::GovernorConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Starting concurrency ceiling
    pub max_concurrency: usize,
    /// Floor the governor may lower the ceiling to
    pub min_concurrency: usize,
    /// Error rate that triggers a ceiling adjustment
    pub concurrency_adjustment_threshold: f64,
    /// How long a synchronous request may wait for a slot
    pub request_timeout: Duration,
    /// Per-job processing timeout
    pub job_timeout: Duration,
    /// Interval of the health loop that adjusts the ceiling
    pub health_check_interval: Duration,
    /// Scratch space for in-flight jobs
    pub work_dir: String,
    /// Directory where primary artifacts are persisted locally
    pub output_dir: String,
    /// External engine binary
    pub engine_bin: String,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Interval for claiming orphaned pending messages
    pub claim_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            min_concurrency: 1,
            concurrency_adjustment_threshold: 0.5,
            request_timeout: Duration::from_secs(30),
            job_timeout: Duration::from_secs(600),
            health_check_interval: Duration::from_secs(30),
            work_dir: "/tmp/fswap".to_string(),
            output_dir: "/tmp/fswap/outputs".to_string(),
            engine_bin: "facefusion".to_string(),
            shutdown_timeout: Duration::from_secs(30),
            claim_interval: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: std::env::var("MAX_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrency),
            min_concurrency: std::env::var("MIN_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.min_concurrency),
            concurrency_adjustment_threshold: std::env::var("CONCURRENCY_ADJUSTMENT_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.concurrency_adjustment_threshold),
            request_timeout: Duration::from_secs(
                std::env::var("REQUEST_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            job_timeout: Duration::from_secs(
                std::env::var("JOB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            health_check_interval: Duration::from_secs(
                std::env::var("HEALTH_CHECK_INTERVAL")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            work_dir: std::env::var("WORK_DIR").unwrap_or(defaults.work_dir),
            output_dir: std::env::var("OUTPUT_DIR").unwrap_or(defaults.output_dir),
            engine_bin: std::env::var("ENGINE_BIN").unwrap_or(defaults.engine_bin),
            shutdown_timeout: Duration::from_secs(
                std::env::var("SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Governor settings derived from this config.
    ///
    /// MAX_CONCURRENCY is a hard cap: the ceiling starts there, may be
    /// lowered under error pressure, and recovers back up to it but never
    /// past it.
    pub fn governor_config(&self) -> GovernorConfig {
        let max = self.max_concurrency.max(1);
        GovernorConfig {
            initial: max,
            min: self.min_concurrency.clamp(1, max),
            max,
            error_rate_threshold: self.concurrency_adjustment_threshold,
        }
    }
}
