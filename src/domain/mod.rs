//! Domain types for the fall-event detection and dispatch pipeline.

pub mod alert;
pub mod contact;
pub mod decision;
pub mod geo;
pub mod responder;
pub mod signal;

pub use alert::{
    AlertId, AlertRecord, AlertStateError, AlertStatus, AttemptStatus, DecisionSource,
    NotificationAttempt,
};
pub use contact::{ChannelAddress, ChannelKind, Contact, ContactTier, TierKind, UserProfile};
pub use decision::{DecisionTier, FusedDecision};
pub use geo::{GeoPoint, EARTH_RADIUS_KM};
pub use responder::{AssignmentState, Responder, ResponderAssignment, ResponderId, ResponderRole};
pub use signal::{DetectionSignal, Modality, SignalError, UserId};
