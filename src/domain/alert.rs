//! Alert records and their lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contact::ChannelKind;
use super::geo::GeoPoint;
use super::signal::UserId;

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(Uuid);

impl AlertId {
    /// Create a new random alert id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for AlertId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the alert came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Created from a confirmed fusion decision
    Fused,
    /// Created by an explicit manual trigger, bypassing fusion
    Manual,
}

/// Lifecycle status of an alert.
///
/// `Resolved`, `Failed` and `Closed` are terminal: once reached, no
/// further transition is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Created, dispatch not yet started
    Pending,
    /// Notification fan-out in progress
    Dispatching,
    /// At least one notification delivered, no acknowledgment yet
    PartialSuccess,
    /// Acknowledged by an authorized party
    Resolved,
    /// All tiers exhausted without acknowledgment
    Failed,
    /// Administratively closed before resolution (e.g. false alarm)
    Closed,
}

impl AlertStatus {
    /// Whether this status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AlertStatus::Resolved | AlertStatus::Failed | AlertStatus::Closed
        )
    }

    /// Whether a transition to `next` is legal from this status.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        use AlertStatus::*;
        match (self, next) {
            (Pending, Dispatching) | (Pending, Closed) => true,
            (Dispatching, PartialSuccess)
            | (Dispatching, Resolved)
            | (Dispatching, Failed)
            | (Dispatching, Closed) => true,
            (PartialSuccess, Resolved) | (PartialSuccess, Failed) | (PartialSuccess, Closed) => {
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Pending => write!(f, "pending"),
            AlertStatus::Dispatching => write!(f, "dispatching"),
            AlertStatus::PartialSuccess => write!(f, "partial_success"),
            AlertStatus::Resolved => write!(f, "resolved"),
            AlertStatus::Failed => write!(f, "failed"),
            AlertStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Error raised on an illegal status transition.
#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal alert transition {from} -> {to}")]
pub struct AlertStateError {
    /// Status the alert was in
    pub from: AlertStatus,
    /// Status that was requested
    pub to: AlertStatus,
}

/// A fall/distress event being dispatched.
///
/// Owned by the dispatch orchestrator; all mutation for one record goes
/// through its single-writer driver task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    /// Unique identifier
    pub id: AlertId,
    /// Affected user
    pub user_id: UserId,
    /// Last known location at creation time
    pub location: Option<GeoPoint>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status
    status: AlertStatus,
    /// How the alert was created
    pub decision_source: DecisionSource,
    /// Who acknowledged, once resolved
    acknowledged_by: Option<String>,
    /// When a terminal status was reached
    finished_at: Option<DateTime<Utc>>,
}

impl AlertRecord {
    /// Create a new alert in `Pending` status.
    pub fn new(user_id: UserId, location: Option<GeoPoint>, source: DecisionSource) -> Self {
        Self {
            id: AlertId::new(),
            user_id,
            location,
            created_at: Utc::now(),
            status: AlertStatus::Pending,
            decision_source: source,
            acknowledged_by: None,
            finished_at: None,
        }
    }

    /// Current status.
    pub fn status(&self) -> AlertStatus {
        self.status
    }

    /// Whether the record has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Who acknowledged the alert, if resolved.
    pub fn acknowledged_by(&self) -> Option<&str> {
        self.acknowledged_by.as_deref()
    }

    /// When the record reached a terminal status.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Apply a status transition, rejecting illegal ones.
    pub fn transition(&mut self, next: AlertStatus) -> Result<(), AlertStateError> {
        if !self.status.can_transition_to(next) {
            return Err(AlertStateError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Resolve the alert on acknowledgment by an authorized party.
    pub fn acknowledge(&mut self, by: impl Into<String>) -> Result<(), AlertStateError> {
        self.transition(AlertStatus::Resolved)?;
        self.acknowledged_by = Some(by.into());
        Ok(())
    }
}

/// Status of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Attempt scheduled, outcome unknown
    Pending,
    /// Delivered to the channel provider
    Sent,
    /// Delivery failed
    Failed,
}

/// One notification delivery attempt for one contact on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationAttempt {
    /// Alert being notified about
    pub alert_id: AlertId,
    /// Channel family used
    pub channel: ChannelKind,
    /// Channel-specific target address
    pub target_contact: String,
    /// 1-based retry counter
    pub attempt_no: u32,
    /// Outcome of this attempt
    pub status: AttemptStatus,
    /// When the attempt finished
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AlertRecord {
        AlertRecord::new(UserId::from("u1"), None, DecisionSource::Fused)
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut alert = record();
        assert_eq!(alert.status(), AlertStatus::Pending);

        alert.transition(AlertStatus::Dispatching).unwrap();
        alert.transition(AlertStatus::PartialSuccess).unwrap();
        alert.acknowledge("caregiver-1").unwrap();

        assert_eq!(alert.status(), AlertStatus::Resolved);
        assert_eq!(alert.acknowledged_by(), Some("caregiver-1"));
        assert!(alert.finished_at().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [AlertStatus::Resolved, AlertStatus::Failed, AlertStatus::Closed] {
            for next in [
                AlertStatus::Pending,
                AlertStatus::Dispatching,
                AlertStatus::PartialSuccess,
                AlertStatus::Resolved,
                AlertStatus::Failed,
                AlertStatus::Closed,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} must be illegal"
                );
            }
        }
    }

    #[test]
    fn test_illegal_transition_rejected() {
        let mut alert = record();
        let err = alert.transition(AlertStatus::PartialSuccess);
        assert!(err.is_err());
        // Status untouched on rejection.
        assert_eq!(alert.status(), AlertStatus::Pending);
    }

    #[test]
    fn test_dispatch_can_fail_directly() {
        let mut alert = record();
        alert.transition(AlertStatus::Dispatching).unwrap();
        alert.transition(AlertStatus::Failed).unwrap();
        assert!(alert.is_terminal());
        assert!(alert.transition(AlertStatus::Closed).is_err());
    }

    #[test]
    fn test_pending_alert_can_be_closed() {
        let mut alert = record();
        alert.transition(AlertStatus::Closed).unwrap();
        assert!(alert.is_terminal());
    }
}
