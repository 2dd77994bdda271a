//! Request intake.
//!
//! A `SwapRequest` is the wire shape shared by the queue payload and the
//! synchronous HTTP endpoint. `into_job` is the single normalization point;
//! nothing downstream ever sees a half-validated request.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use validator::Validate;

use crate::job::{Job, JobId, MediaType};
use crate::processor::{resolve_processors, UnknownProcessor};
use crate::resolution::Resolution;

/// Errors rejecting a request before it becomes a job.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error(transparent)]
    UnknownProcessor(#[from] UnknownProcessor),
}

impl IntakeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Accept either `"source_url": "..."` or `"source_urls": ["...", ...]`.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// An incoming face-swap request, not yet validated.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SwapRequest {
    /// Caller-assigned job id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Target media kind
    pub media_type: MediaType,

    /// Source face URL(s)
    #[serde(alias = "source_url", deserialize_with = "one_or_many")]
    #[validate(length(min = 1, message = "at least one source is required"))]
    pub source_urls: Vec<String>,

    /// Target media URL
    #[validate(url(message = "target_url must be a valid URL"))]
    pub target_url: String,

    /// Mapping file URL; presence selects reference mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_url: Option<String>,

    /// Output resolution, defaults to 1024x1024
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,

    /// Processor names to run, defaults to face_swapper
    #[serde(default)]
    pub processors: Vec<String>,

    /// Face count reported by the upstream detector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_faces: Option<u32>,

    /// Hard per-job deadline in seconds from intake
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl SwapRequest {
    /// Validate and normalize into a queued `Job`.
    pub fn into_job(self) -> Result<Job, IntakeError> {
        self.validate()
            .map_err(|e| IntakeError::invalid(flatten_validation(&e)))?;

        if self.source_urls.iter().any(|s| s.trim().is_empty()) {
            return Err(IntakeError::invalid("empty source URL"));
        }

        let processors = resolve_processors(&self.processors)?;
        let resolution = self.resolution.unwrap_or_default();

        let mut job = Job::new(
            self.media_type,
            self.source_urls,
            self.target_url,
            resolution,
            processors,
        );

        if let Some(id) = self.job_id {
            if id.trim().is_empty() {
                return Err(IntakeError::invalid("job_id must not be blank"));
            }
            job.id = JobId(id);
        }
        if let Some(mapping_url) = self.mapping_url {
            job = job.with_mapping(mapping_url);
        }
        job.detected_faces = self.detected_faces;
        job.timeout_at = self.timeout_seconds.map(|secs| deadline_from_now(secs));

        Ok(job)
    }
}

fn deadline_from_now(secs: u64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(secs.min(i64::MAX as u64) as i64)
}

fn flatten_validation(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .map(|(field, errs)| {
            let detail = errs
                .iter()
                .filter_map(|e| e.message.as_deref())
                .collect::<Vec<_>>()
                .join(", ");
            if detail.is_empty() {
                field.to_string()
            } else {
                format!("{field}: {detail}")
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
