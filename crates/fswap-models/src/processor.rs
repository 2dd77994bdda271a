//! Processor registry.
//!
//! Processors are the named stages the external engine can run. The set is
//! closed and resolved at configuration time; unknown names are rejected at
//! intake instead of being passed through to the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown processor '{0}'")]
pub struct UnknownProcessor(pub String);

/// A named engine capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Processor {
    FaceSwapper,
    FaceEnhancer,
    FrameEnhancer,
    LipSyncer,
}

impl Processor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Processor::FaceSwapper => "face_swapper",
            Processor::FaceEnhancer => "face_enhancer",
            Processor::FrameEnhancer => "frame_enhancer",
            Processor::LipSyncer => "lip_syncer",
        }
    }

    /// Look up a processor by its wire name.
    pub fn from_name(name: &str) -> Result<Self, UnknownProcessor> {
        match name {
            "face_swapper" => Ok(Processor::FaceSwapper),
            "face_enhancer" => Ok(Processor::FaceEnhancer),
            "frame_enhancer" => Ok(Processor::FrameEnhancer),
            "lip_syncer" => Ok(Processor::LipSyncer),
            other => Err(UnknownProcessor(other.to_string())),
        }
    }

    /// Default pipeline when the request names none.
    pub fn default_set() -> Vec<Processor> {
        vec![Processor::FaceSwapper]
    }
}

/// Resolve a list of processor names, de-duplicating while preserving order.
pub fn resolve_processors(names: &[String]) -> Result<Vec<Processor>, UnknownProcessor> {
    if names.is_empty() {
        return Ok(Processor::default_set());
    }

    let mut processors = Vec::with_capacity(names.len());
    for name in names {
        let p = Processor::from_name(name)?;
        if !processors.contains(&p) {
            processors.push(p);
        }
    }
    Ok(processors)
}
