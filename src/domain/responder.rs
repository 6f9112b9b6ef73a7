//! Responders and the per-alert offer assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::alert::AlertId;
use super::geo::GeoPoint;

/// Unique identifier for a responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResponderId(Uuid);

impl ResponderId {
    /// Create a new random responder id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ResponderId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ResponderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a responder in the emergency network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderRole {
    /// Community volunteer able to physically check on the user
    Volunteer,
    /// Medical professional for remote or on-site assessment
    Doctor,
}

impl std::fmt::Display for ResponderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponderRole::Volunteer => write!(f, "volunteer"),
            ResponderRole::Doctor => write!(f, "doctor"),
        }
    }
}

/// A registered responder.
///
/// Lifecycle is owned by the responder registry; the matcher only reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Responder {
    /// Unique identifier
    pub id: ResponderId,
    /// Display name
    pub name: String,
    /// Network role
    pub role: ResponderRole,
    /// Phone number for notification fan-out
    pub phone: String,
    /// Registered location
    pub location: GeoPoint,
    /// Whether the responder is currently taking offers
    pub available: bool,
    /// Last time the responder was tasked, for load fairness
    pub last_response_at: Option<DateTime<Utc>>,
}

/// State of a responder offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    /// Offer sent, awaiting reply
    Offered,
    /// Responder accepted the offer
    Accepted,
    /// Responder declined the offer
    Declined,
    /// No reply within the offer timeout
    TimedOut,
}

impl AssignmentState {
    /// Whether the offer has a final answer.
    pub fn is_settled(&self) -> bool {
        !matches!(self, AssignmentState::Offered)
    }
}

/// A sequential responder-assignment proposal for one alert.
///
/// At most one assignment per alert is in `Offered` state at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderAssignment {
    /// Alert the offer belongs to
    pub alert_id: AlertId,
    /// Responder being offered the task
    pub responder_id: ResponderId,
    /// Distance from the user in kilometers
    pub distance_km: f64,
    /// Current offer state
    pub state: AssignmentState,
    /// When the offer was issued
    pub offered_at: DateTime<Utc>,
}

impl ResponderAssignment {
    /// Create a fresh offer.
    pub fn offer(alert_id: AlertId, responder_id: ResponderId, distance_km: f64) -> Self {
        Self {
            alert_id,
            responder_id,
            distance_km,
            state: AssignmentState::Offered,
            offered_at: Utc::now(),
        }
    }

    /// Settle the offer with a final state.
    pub fn settle(&mut self, state: AssignmentState) {
        debug_assert!(state.is_settled());
        self.state = state;
    }
}
