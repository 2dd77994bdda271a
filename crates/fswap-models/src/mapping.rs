//! Face-mapping model for reference-mode swaps.
//!
//! A mapping file is an ordered JSON list of entries pairing a reference
//! face in the target with the source face that replaces it. Reference mode
//! requires the mapping to be a bijection: every reference face maps to
//! exactly one target identity and vice versa.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Face selector mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectorMode {
    /// Broadcast a single source face to every detected face in the target.
    #[default]
    Many,
    /// Swap specific identities according to an explicit mapping file.
    Reference,
}

impl SelectorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectorMode::Many => "many",
            SelectorMode::Reference => "reference",
        }
    }
}

/// Errors produced while parsing or validating a mapping file.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("Malformed mapping file: {0}")]
    Malformed(String),

    #[error("Mapping cardinality mismatch: {0}")]
    CardinalityMismatch(String),

    #[error("Mapping file missing: {0}")]
    MissingFile(String),
}

impl MappingError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn cardinality(msg: impl Into<String>) -> Self {
        Self::CardinalityMismatch(msg.into())
    }

    pub fn missing_file(msg: impl Into<String>) -> Self {
        Self::MissingFile(msg.into())
    }
}

/// One identity-to-identity pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceMappingEntry {
    /// Position of the reference face in the target (detector order).
    pub reference_face_id: u32,
    /// Path or URL of the source face image for this identity.
    pub source_face_path: String,
    /// Selector naming the target identity this entry replaces.
    pub target_identity_selector: String,
}

/// An ordered, validated face mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceMapping {
    pub entries: Vec<FaceMappingEntry>,
}

impl FaceMapping {
    /// Parse a mapping file body.
    ///
    /// Accepts either a bare JSON array of entries or an object with an
    /// `entries` field. The bijection invariant is validated here; the
    /// cardinality check against the detected-face count happens in
    /// [`FaceMapping::check_cardinality`] because the count is not always
    /// known at parse time.
    pub fn from_json_str(body: &str) -> Result<Self, MappingError> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            List(Vec<FaceMappingEntry>),
            Object { entries: Vec<FaceMappingEntry> },
        }

        let entries = match serde_json::from_str::<Wire>(body) {
            Ok(Wire::List(entries)) | Ok(Wire::Object { entries }) => entries,
            Err(e) => return Err(MappingError::malformed(e.to_string())),
        };

        let mapping = Self { entries };
        mapping.validate_bijection()?;
        Ok(mapping)
    }

    /// Number of identity pairs (1 = single, 2 = dual, 3 = triple, ...).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validate the bijection invariant: no duplicated reference face and
    /// no duplicated target identity.
    fn validate_bijection(&self) -> Result<(), MappingError> {
        if self.entries.is_empty() {
            return Err(MappingError::malformed("mapping file has no entries"));
        }

        let mut seen_refs = HashSet::new();
        let mut seen_targets = HashSet::new();

        for entry in &self.entries {
            if entry.source_face_path.trim().is_empty() {
                return Err(MappingError::malformed(format!(
                    "entry for reference face {} has an empty source path",
                    entry.reference_face_id
                )));
            }
            if !seen_refs.insert(entry.reference_face_id) {
                return Err(MappingError::cardinality(format!(
                    "reference face {} mapped more than once",
                    entry.reference_face_id
                )));
            }
            if !seen_targets.insert(entry.target_identity_selector.as_str()) {
                return Err(MappingError::cardinality(format!(
                    "target identity '{}' assigned more than once",
                    entry.target_identity_selector
                )));
            }
        }

        Ok(())
    }

    /// Check the strict 1:1 cardinality against the number of identities
    /// detected in the target.
    pub fn check_cardinality(&self, detected_faces: usize) -> Result<(), MappingError> {
        if self.entries.len() != detected_faces {
            return Err(MappingError::cardinality(format!(
                "{} mapping entries but {} detected target identities",
                self.entries.len(),
                detected_faces
            )));
        }
        Ok(())
    }

    /// Source face paths in entry order.
    pub fn source_paths(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.source_face_path.as_str())
            .collect()
    }
}
