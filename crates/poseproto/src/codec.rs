//! Delimited text codec for pose vectors.
//!
//! ## Wire Format
//!
//! ```text
//! 1.5,0,-10
//! ```
//!
//! Components are finite decimal numbers joined by a single separator
//! character (`,` unless configured otherwise). There is no escaping, so the
//! separator can never be a character that appears inside a number. The
//! component count is fixed per deployment; anything else is malformed and
//! must be dropped, not truncated or padded.

use poseconf::PoseConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Index;

/// A peer's reported pose: a fixed-length sequence of finite numbers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoseVector(Vec<f64>);

impl PoseVector {
    pub fn new(components: Vec<f64>) -> Self {
        Self(components)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.0.get(index).copied()
    }
}

impl From<Vec<f64>> for PoseVector {
    fn from(components: Vec<f64>) -> Self {
        Self(components)
    }
}

impl<const N: usize> From<[f64; N]> for PoseVector {
    fn from(components: [f64; N]) -> Self {
        Self(components.to_vec())
    }
}

impl Index<usize> for PoseVector {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl fmt::Display for PoseVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, "]")
    }
}

/// Reasons a payload can't be turned into (or made from) a pose vector.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    #[error("Empty payload")]
    Empty,
    #[error("Wrong component count: expected {expected}, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("Component {index} is not a number: {component:?}")]
    NotNumeric { index: usize, component: String },
    #[error("Component {index} is not finite")]
    NonFinite { index: usize },
}

/// Encoder/decoder for one deployment's pose payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseCodec {
    vector_len: usize,
    separator: char,
}

impl PoseCodec {
    /// Build a codec. The caller is responsible for choosing a separator that
    /// can't occur in a number; `PoseConfig::validate` enforces that for
    /// configured values.
    pub fn new(vector_len: usize, separator: char) -> Self {
        Self {
            vector_len,
            separator,
        }
    }

    pub fn vector_len(&self) -> usize {
        self.vector_len
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Render a vector as a payload string.
    pub fn encode(&self, pose: &PoseVector) -> Result<String, PayloadError> {
        if pose.len() != self.vector_len {
            return Err(PayloadError::WrongLength {
                expected: self.vector_len,
                actual: pose.len(),
            });
        }
        if let Some(index) = pose.as_slice().iter().position(|c| !c.is_finite()) {
            return Err(PayloadError::NonFinite { index });
        }

        let mut out = String::with_capacity(pose.len() * 8);
        for (i, c) in pose.as_slice().iter().enumerate() {
            if i > 0 {
                out.push(self.separator);
            }
            out.push_str(&c.to_string());
        }
        Ok(out)
    }

    /// Parse a payload string into a vector.
    ///
    /// Surrounding whitespace on each component is ignored.
    pub fn decode(&self, payload: &str) -> Result<PoseVector, PayloadError> {
        if payload.trim().is_empty() {
            return Err(PayloadError::Empty);
        }

        let parts: Vec<&str> = payload.split(self.separator).collect();
        if parts.len() != self.vector_len {
            return Err(PayloadError::WrongLength {
                expected: self.vector_len,
                actual: parts.len(),
            });
        }

        let mut components = Vec::with_capacity(parts.len());
        for (index, raw) in parts.into_iter().enumerate() {
            let trimmed = raw.trim();
            let value: f64 = trimmed.parse().map_err(|_| PayloadError::NotNumeric {
                index,
                component: trimmed.to_string(),
            })?;
            if !value.is_finite() {
                return Err(PayloadError::NonFinite { index });
            }
            components.push(value);
        }

        Ok(PoseVector(components))
    }
}

impl Default for PoseCodec {
    fn default() -> Self {
        Self::from(&PoseConfig::default())
    }
}

impl From<&PoseConfig> for PoseCodec {
    fn from(config: &PoseConfig) -> Self {
        Self::new(config.vector_len, config.separator)
    }
}
