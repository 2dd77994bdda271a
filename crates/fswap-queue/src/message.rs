//! Queue message payload.

use serde::{Deserialize, Serialize};

use fswap_models::{IntakeError, Job, SwapRequest};

/// A swap request as it travels through the stream.
///
/// The payload is the wire-level `SwapRequest`; normalization into a `Job`
/// happens on the consumer side so malformed payloads are rejected exactly
/// where the retry/DLQ decision is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueuedRequest(pub SwapRequest);

impl QueuedRequest {
    pub fn new(request: SwapRequest) -> Self {
        Self(request)
    }

    /// Dedup key. Only requests carrying a caller-assigned job id are
    /// deduplicated; anonymous requests are always admitted.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.0.job_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Description for logs before the request has a job id.
    pub fn describe(&self) -> String {
        match &self.0.job_id {
            Some(id) => id.clone(),
            None => format!("{}:{}", self.0.media_type.as_str(), self.0.target_url),
        }
    }

    /// Normalize into a queued job.
    pub fn into_job(self) -> Result<Job, IntakeError> {
        self.0.into_job()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(job_id: Option<&str>) -> QueuedRequest {
        let mut req: SwapRequest = serde_json::from_str(
            r#"{
                "media_type": "image",
                "source_url": "https://cdn.example.com/face.jpg",
                "target_url": "https://cdn.example.com/target.jpg"
            }"#,
        )
        .unwrap();
        req.job_id = job_id.map(String::from);
        QueuedRequest::new(req)
    }

    #[test]
    fn idempotency_requires_job_id() {
        assert_eq!(request(Some("req-1")).idempotency_key(), Some("req-1"));
        assert_eq!(request(None).idempotency_key(), None);
        assert_eq!(request(Some("")).idempotency_key(), None);
    }

    #[test]
    fn payload_round_trips_as_plain_request() {
        let queued = request(Some("req-1"));
        let json = serde_json::to_string(&queued).unwrap();
        // Transparent wrapper: the wire shape is the request itself.
        assert!(json.contains("\"job_id\":\"req-1\""));
        let back: QueuedRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.idempotency_key(), Some("req-1"));
    }
}
