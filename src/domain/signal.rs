//! Detection signals emitted by the per-modality extractors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a monitored user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// View the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sensing modality a signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Pose-based visual detector
    Video,
    /// Acoustic event detector
    Audio,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Video => write!(f, "video"),
            Modality::Audio => write!(f, "audio"),
        }
    }
}

/// Error raised for an invalid raw signal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignalError {
    /// Confidence outside the unit interval
    #[error("confidence {value} for user {user_id} is outside 0.0..=1.0")]
    OutOfRange {
        /// User the signal belongs to
        user_id: UserId,
        /// Offending value
        value: f64,
    },

    /// Confidence was not a number
    #[error("confidence for user {user_id} is NaN")]
    NotANumber {
        /// User the signal belongs to
        user_id: UserId,
    },
}

/// A single validated detection sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSignal {
    /// User the signal was observed for
    pub user_id: UserId,
    /// Modality that produced it
    pub modality: Modality,
    /// Detector confidence in 0.0..=1.0
    pub confidence: f64,
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
}

impl DetectionSignal {
    /// Validate and build a signal. Rejects NaN and out-of-range
    /// confidences at the boundary so the rest of the pipeline can
    /// trust the value.
    pub fn new(
        user_id: UserId,
        modality: Modality,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, SignalError> {
        if confidence.is_nan() {
            return Err(SignalError::NotANumber { user_id });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(SignalError::OutOfRange {
                user_id,
                value: confidence,
            });
        }
        Ok(Self {
            user_id,
            modality,
            confidence,
            timestamp,
        })
    }
}
