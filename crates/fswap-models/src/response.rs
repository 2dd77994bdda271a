//! Response envelope shared by the API and the worker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Published result URLs keyed by format name (`original_url`, `gif_url`,
/// `webp_url`, `poster_url`, ...). BTreeMap keeps response ordering stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultUrls(pub BTreeMap<String, String>);

impl ResultUrls {
    pub fn insert(&mut self, format: impl Into<String>, url: impl Into<String>) {
        self.0.insert(format.into(), url.into());
    }

    pub fn get(&self, format: &str) -> Option<&str> {
        self.0.get(format).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Wire response for a processing request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// "success" or "error"
    pub status: String,

    /// Format name → public URL (success only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultUrls>,

    /// Wall-clock processing time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,

    /// Error summary (failure only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Diagnostic detail, e.g. the engine's stderr tail (failure only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ProcessOutcome {
    pub fn success(result: ResultUrls, processing_time: f64) -> Self {
        Self {
            status: "success".to_string(),
            result: Some(result),
            processing_time: Some(processing_time),
            error: None,
            traceback: None,
        }
    }

    pub fn error(
        error: impl Into<String>,
        traceback: Option<String>,
        processing_time: Option<f64>,
    ) -> Self {
        Self {
            status: "error".to_string(),
            result: None,
            processing_time,
            error: Some(error.into()),
            traceback,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_serialization_omits_error_fields() {
        let mut urls = ResultUrls::default();
        urls.insert("original_url", "https://cdn.example.com/out.mp4");
        urls.insert("gif_url", "https://cdn.example.com/out.gif");

        let outcome = ProcessOutcome::success(urls, 12.5);
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["status"], "success");
        assert_eq!(json["result"]["gif_url"], "https://cdn.example.com/out.gif");
        assert!(json.get("error").is_none());
        assert!(json.get("traceback").is_none());
    }

    #[test]
    fn error_serialization_omits_result() {
        let outcome =
            ProcessOutcome::error("engine failed", Some("stderr tail".to_string()), Some(3.0));
        let json = serde_json::to_value(&outcome).unwrap();

        assert_eq!(json["status"], "error");
        assert_eq!(json["traceback"], "stderr tail");
        assert!(json.get("result").is_none());
    }
}
