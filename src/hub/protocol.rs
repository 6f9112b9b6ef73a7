//! Wire envelopes for the live channel protocol.
//!
//! Every message is JSON of the shape `{"type": ..., "payload": ...}`;
//! types with no payload omit the field. The same envelope enum covers
//! both directions of the connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AlertId, ChannelKind, DecisionSource, GeoPoint, ResponderId, UserId};

/// Role a client declares when registering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// The monitored user's own device
    User,
    /// A caregiver dashboard or phone
    Caregiver,
    /// A responder device
    Responder,
}

/// A protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    /// Client registers (idempotently) under a stable client id
    RegisterClient {
        /// Stable client identifier; the monitored user's device uses
        /// its user id here
        client_id: String,
        /// Declared role, defaults to `user` semantics when absent
        #[serde(default)]
        role: Option<ClientRole>,
    },

    /// Server confirms a registration
    RegistrationConfirm {
        /// Registered client id
        client_id: String,
        /// Human-readable confirmation
        message: String,
    },

    /// Server greeting on connect
    Welcome {
        /// Human-readable greeting
        message: String,
        /// Server time
        timestamp: DateTime<Utc>,
    },

    /// Client asks monitoring to start
    StartDetection,

    /// Client asks monitoring to stop
    StopDetection,

    /// Client keep-alive
    Heartbeat,

    /// Server reply to a heartbeat
    HeartbeatResponse {
        /// Server time
        timestamp: DateTime<Utc>,
    },

    /// A fall event was confirmed and an alert opened
    FallDetected {
        /// Alert created for the event
        alert_id: AlertId,
        /// Affected user
        user_id: UserId,
        /// Fused score that confirmed the event (1.0 for manual triggers)
        score: f64,
        /// Whether the alert came from fusion or a manual trigger
        decision_source: DecisionSource,
        /// Last known location
        location: Option<GeoPoint>,
        /// When the alert was created
        timestamp: DateTime<Utc>,
    },

    /// A notification attempt finished
    AlertSent {
        /// Alert being notified about
        alert_id: AlertId,
        /// Channel used
        channel: ChannelKind,
        /// Target address
        target_contact: String,
        /// 1-based retry counter
        attempt_no: u32,
        /// Whether delivery succeeded
        delivered: bool,
    },

    /// A guidance step addressed to the affected user's device
    AiAssistant {
        /// Alert the guidance belongs to
        alert_id: AlertId,
        /// 1-based step number
        step: u32,
        /// Total steps in the sequence
        total_steps: u32,
        /// Prompt text to present
        prompt: String,
    },

    /// Free-form status broadcast
    StatusUpdate {
        /// Related alert, if any
        alert_id: Option<AlertId>,
        /// Related user, if any
        user_id: Option<UserId>,
        /// Machine-readable status keyword
        status: String,
        /// Human-readable detail
        #[serde(default)]
        detail: Option<String>,
        /// Server time
        timestamp: DateTime<Utc>,
    },

    /// Manual trigger: creates an alert directly, bypassing fusion
    EmergencyAlert {
        /// User the alert is raised for
        user_id: UserId,
        /// Location reported with the trigger
        #[serde(default)]
        location: Option<GeoPoint>,
        /// Optional free-text note
        #[serde(default)]
        note: Option<String>,
    },

    /// Device acknowledgment of the current guidance step
    GuidanceAck {
        /// Alert whose guidance sequence is being acknowledged
        alert_id: AlertId,
    },

    /// Acknowledgment of an alert by an authorized party
    AlertAck {
        /// Alert being acknowledged
        alert_id: AlertId,
        /// Who acknowledged
        by: String,
    },

    /// Responder's answer to an outstanding offer
    ResponderReply {
        /// Alert the offer belonged to
        alert_id: AlertId,
        /// Replying responder
        responder_id: ResponderId,
        /// Accept or decline
        accepted: bool,
    },

    /// Server echoes back an unrecognized-but-valid message
    Echo {
        /// The original message
        original: serde_json::Value,
        /// Server time
        timestamp: DateTime<Utc>,
    },
}

impl Envelope {
    /// Build a `status_update` envelope.
    pub fn status_update(
        alert_id: Option<AlertId>,
        user_id: Option<UserId>,
        status: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        Envelope::StatusUpdate {
            alert_id,
            user_id,
            status: status.into(),
            detail,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_has_no_payload() {
        let json = serde_json::to_value(&Envelope::Heartbeat).unwrap();
        assert_eq!(json, serde_json::json!({"type": "heartbeat"}));

        let parsed: Envelope = serde_json::from_str(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(parsed, Envelope::Heartbeat));
    }

    #[test]
    fn test_register_client_parses() {
        let parsed: Envelope = serde_json::from_str(
            r#"{"type":"register_client","payload":{"client_id":"user-7","role":"caregiver"}}"#,
        )
        .unwrap();
        match parsed {
            Envelope::RegisterClient { client_id, role } => {
                assert_eq!(client_id, "user-7");
                assert_eq!(role, Some(ClientRole::Caregiver));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_emergency_alert_minimal_payload() {
        let parsed: Envelope = serde_json::from_str(
            r#"{"type":"emergency_alert","payload":{"user_id":"user-7"}}"#,
        )
        .unwrap();
        match parsed {
            Envelope::EmergencyAlert {
                user_id,
                location,
                note,
            } => {
                assert_eq!(user_id, UserId::from("user-7"));
                assert!(location.is_none());
                assert!(note.is_none());
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_fall_detected_wire_shape() {
        let envelope = Envelope::FallDetected {
            alert_id: AlertId::new(),
            user_id: UserId::from("u1"),
            score: 0.9,
            decision_source: DecisionSource::Fused,
            location: Some(GeoPoint::new(40.0, -3.0)),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "fall_detected");
        assert_eq!(json["payload"]["user_id"], "u1");
        assert_eq!(json["payload"]["decision_source"], "fused");
    }
}
