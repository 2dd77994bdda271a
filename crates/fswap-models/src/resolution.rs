//! Output resolution parsing.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bounds accepted for either dimension, matching what the engine and the
/// downstream encoders handle.
const MIN_DIMENSION: u32 = 64;
const MAX_DIMENSION: u32 = 8192;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Invalid resolution '{0}', expected 'WIDTHxHEIGHT' like '1024x1024'")]
    InvalidFormat(String),

    #[error("Resolution dimension {0} out of range [{MIN_DIMENSION}, {MAX_DIMENSION}]")]
    OutOfRange(u32),
}

/// Output resolution as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Create a resolution without range validation. Prefer [`FromStr`] for
    /// untrusted input.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1024, 1024)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| ResolutionError::InvalidFormat(s.to_string()))?;

        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| ResolutionError::InvalidFormat(s.to_string()))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| ResolutionError::InvalidFormat(s.to_string()))?;

        for dim in [width, height] {
            if !(MIN_DIMENSION..=MAX_DIMENSION).contains(&dim) {
                return Err(ResolutionError::OutOfRange(dim));
            }
        }

        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = ResolutionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> Self {
        r.to_string()
    }
}
