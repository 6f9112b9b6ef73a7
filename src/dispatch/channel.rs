//! Notification channel abstraction.
//!
//! Concrete providers (SMS gateways, mail relays, voice APIs) live
//! behind `NotificationChannel`; the orchestrator only sees send
//! outcomes. Channel failures are per-attempt data, never panics.

use async_trait::async_trait;

use crate::domain::ChannelKind;

/// Classification of a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// Provider did not answer in time
    Timeout,
    /// Provider answered with a rejection
    Rejected,
    /// Target address cannot be reached at all
    Unreachable,
    /// No provider is configured for this channel
    NotConfigured,
}

/// Error from one delivery attempt.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{channel} delivery failed ({kind:?}): {message}")]
pub struct ChannelDeliveryError {
    /// Channel that failed
    pub channel: ChannelKind,
    /// Failure classification
    pub kind: DeliveryErrorKind,
    /// Provider detail
    pub message: String,
}

/// One way of reaching a contact.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Which channel this provider implements.
    fn kind(&self) -> ChannelKind;

    /// Deliver `message` to `address`. Returns once the provider has
    /// accepted or rejected the message.
    async fn send(&self, address: &str, message: &str) -> Result<(), ChannelDeliveryError>;
}

/// Channel that only logs, for development and demos.
pub struct LoggingChannel {
    kind: ChannelKind,
}

impl LoggingChannel {
    /// Create a logging stand-in for a channel.
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl NotificationChannel for LoggingChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn send(&self, address: &str, message: &str) -> Result<(), ChannelDeliveryError> {
        tracing::info!(
            channel = %self.kind,
            address,
            message,
            "Notification delivered (logging channel)"
        );
        Ok(())
    }
}
