//! Fused decisions produced by the detection fusion engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::signal::{Modality, UserId};

/// Graded severity of a fused decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTier {
    /// No action needed
    Normal,
    /// Elevated score, below the confirm threshold
    Suspected,
    /// Confirmed fall event
    Confirmed,
}

impl std::fmt::Display for DecisionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecisionTier::Normal => write!(f, "normal"),
            DecisionTier::Suspected => write!(f, "suspected"),
            DecisionTier::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Outcome of fusing a user's fresh signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedDecision {
    /// User the decision concerns
    pub user_id: UserId,
    /// Fused score in 0.0..=1.0
    pub score: f64,
    /// Modalities whose signals contributed
    pub contributing_modalities: Vec<Modality>,
    /// Graded severity
    pub tier: DecisionTier,
    /// Evaluation time
    pub timestamp: DateTime<Utc>,
}

impl FusedDecision {
    /// Whether this decision confirms a fall event.
    pub fn is_confirmed(&self) -> bool {
        self.tier == DecisionTier::Confirmed
    }
}
