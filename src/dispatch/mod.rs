//! Notification dispatch: channel providers, retry scheduling and the
//! escalation orchestrator.

pub mod channel;
pub mod orchestrator;
pub mod retry;

pub use channel::{ChannelDeliveryError, DeliveryErrorKind, LoggingChannel, NotificationChannel};
pub use orchestrator::{AlertDispatchOrchestrator, DispatchConfig, DispatchError};
pub use retry::RetryPolicy;
