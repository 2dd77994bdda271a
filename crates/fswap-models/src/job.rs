//! Job descriptor and lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::mapping::SelectorMode;
use crate::processor::Processor;
use crate::resolution::Resolution;
use crate::response::ResultUrls;

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media kind of the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MediaType {
    #[default]
    Image,
    Video,
    Gif,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
            MediaType::Gif => "gif",
        }
    }

    /// Extension for the primary artifact.
    ///
    /// Gif targets are processed through the video path and converted back,
    /// so the intermediate engine output is always mp4 for animated media.
    pub fn artifact_extension(&self) -> &'static str {
        match self {
            MediaType::Image => "jpg",
            MediaType::Video => "mp4",
            MediaType::Gif => "gif",
        }
    }

    /// Whether the target has a time axis.
    pub fn is_animated(&self) -> bool {
        matches!(self, MediaType::Video | MediaType::Gif)
    }
}

/// Job state.
///
/// Transitions are monotonic: `Queued` → `Running` → one of the terminal
/// states. [`Job::advance`] refuses backwards moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::TimedOut => "timed_out",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut
        )
    }

    /// Ordering rank used to enforce monotonic transitions.
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Queued => 0,
            JobStatus::Running => 1,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::TimedOut => 2,
        }
    }
}

/// A face-swap job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// Target media kind
    pub media_type: MediaType,

    /// Source face references (URLs). One entry in `many` mode; reference
    /// mode takes its per-identity sources from the mapping file instead.
    pub sources: Vec<String>,

    /// Target media URL
    pub target_url: String,

    /// Mapping file URL (reference mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_url: Option<String>,

    /// Face selector mode
    #[serde(default)]
    pub selector_mode: SelectorMode,

    /// Number of faces detected in the target by the upstream detector,
    /// when known. Used for mapping cardinality validation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_faces: Option<u32>,

    /// Output resolution
    pub resolution: Resolution,

    /// Processors to run, in order
    pub processors: Vec<Processor>,

    /// Job state
    #[serde(default)]
    pub status: JobStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Started at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Finished at timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    /// Error detail (terminal failure paths)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,

    /// Published result URLs by format name
    #[serde(default, skip_serializing_if = "ResultUrls::is_empty")]
    pub result_urls: ResultUrls,

    /// Hard deadline inherited from the queue message, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(
        media_type: MediaType,
        sources: Vec<String>,
        target_url: impl Into<String>,
        resolution: Resolution,
        processors: Vec<Processor>,
    ) -> Self {
        Self {
            id: JobId::new(),
            media_type,
            sources,
            target_url: target_url.into(),
            mapping_url: None,
            selector_mode: SelectorMode::Many,
            detected_faces: None,
            resolution,
            processors,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_detail: None,
            result_urls: ResultUrls::default(),
            timeout_at: None,
        }
    }

    /// Switch to reference mode with the given mapping file URL.
    pub fn with_mapping(mut self, mapping_url: impl Into<String>) -> Self {
        self.mapping_url = Some(mapping_url.into());
        self.selector_mode = SelectorMode::Reference;
        self
    }

    /// Advance to a new status. Returns `false` (and leaves the job
    /// untouched) if the move would be backwards or out of a terminal state.
    pub fn advance(&mut self, status: JobStatus) -> bool {
        if status.rank() <= self.status.rank() {
            return false;
        }
        self.status = status;
        match status {
            JobStatus::Running => self.started_at = Some(Utc::now()),
            s if s.is_terminal() => self.finished_at = Some(Utc::now()),
            _ => {}
        }
        true
    }

    /// Mark the job running.
    pub fn start(&mut self) -> bool {
        self.advance(JobStatus::Running)
    }

    /// Mark the job succeeded with its published URLs.
    pub fn succeed(&mut self, urls: ResultUrls) -> bool {
        if self.advance(JobStatus::Succeeded) {
            debug_assert!(!urls.is_empty(), "succeeded job must carry result URLs");
            self.result_urls = urls;
            true
        } else {
            false
        }
    }

    /// Mark the job failed with a diagnostic.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if self.advance(JobStatus::Failed) {
            self.error_detail = Some(error.into());
            true
        } else {
            false
        }
    }

    /// Mark the job timed out.
    pub fn time_out(&mut self, error: impl Into<String>) -> bool {
        if self.advance(JobStatus::TimedOut) {
            self.error_detail = Some(error.into());
            true
        } else {
            false
        }
    }

    /// Whether the job's queue deadline has already passed.
    pub fn past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at.map(|t| now > t).unwrap_or(false)
    }

    /// Wall-clock processing time in seconds, if finished.
    pub fn processing_time(&self) -> Option<f64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_job() -> Job {
        Job::new(
            MediaType::Image,
            vec!["https://example.com/face.jpg".to_string()],
            "https://example.com/target.jpg",
            Resolution::new(1024, 1024),
            vec![Processor::FaceSwapper],
        )
    }

    #[test]
    fn new_job_is_queued() {
        let job = test_job();
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.started_at.is_none());
        assert_eq!(job.selector_mode, SelectorMode::Many);
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut job = test_job();
        assert!(job.start());
        assert!(job.started_at.is_some());

        let mut urls = ResultUrls::default();
        urls.insert("original_url", "https://cdn.example.com/out.jpg");
        assert!(job.succeed(urls));
        assert_eq!(job.status, JobStatus::Succeeded);

        // No way back out of a terminal state.
        assert!(!job.advance(JobStatus::Running));
        assert!(!job.fail("too late"));
        assert_eq!(job.status, JobStatus::Succeeded);
        assert!(job.error_detail.is_none());
    }

    #[test]
    fn timed_out_is_terminal() {
        let mut job = test_job();
        job.start();
        assert!(job.time_out("deadline exceeded"));
        assert!(job.status.is_terminal());
        assert!(!job.succeed(ResultUrls::default()));
    }

    #[test]
    fn queued_can_fail_directly() {
        // Intake/validation failures terminate a job before it ever runs.
        let mut job = test_job();
        assert!(job.fail("malformed mapping"));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn past_deadline_check() {
        let mut job = test_job();
        assert!(!job.past_deadline(Utc::now()));
        job.timeout_at = Some(Utc::now() - chrono::Duration::seconds(5));
        assert!(job.past_deadline(Utc::now()));
    }

    #[test]
    fn with_mapping_switches_mode() {
        let job = test_job().with_mapping("https://example.com/mapping.json");
        assert_eq!(job.selector_mode, SelectorMode::Reference);
        assert!(job.mapping_url.is_some());
    }
}
