//! Fall event detection and emergency dispatch pipeline.
//!
//! Fuses per-modality detection signals into graded decisions, opens
//! alerts for confirmed falls, fans notifications out across channels
//! with retry and tiered escalation, offers the task to nearby
//! responders, and streams live status to connected clients.
//!
//! # Architecture
//!
//! - [`fusion`]: time-windowed fusion of video and audio confidences
//! - [`dispatch`]: notification channels, retries and the escalation
//!   orchestrator
//! - [`matcher`]: geolocation ranking of responder candidates
//! - [`assistant`]: step-by-step guidance to the user's device
//! - [`hub`]: live status fan-out over the envelope protocol
//! - [`store`]: persistence boundary for alerts and attempts
//! - [`api`]: HTTP/WebSocket transport
//!
//! [`pipeline::CarePipeline`] wires these together.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use careconnect_core::dispatch::{LoggingChannel, NotificationChannel};
//! use careconnect_core::domain::ChannelKind;
//! use careconnect_core::matcher::InMemoryResponderRegistry;
//! use careconnect_core::pipeline::CarePipeline;
//! use careconnect_core::store::InMemoryAlertStore;
//! use careconnect_core::CareConfig;
//!
//! let channels: Vec<Arc<dyn NotificationChannel>> =
//!     vec![Arc::new(LoggingChannel::new(ChannelKind::Sms))];
//! let pipeline = CarePipeline::new(
//!     CareConfig::default(),
//!     channels,
//!     Arc::new(InMemoryResponderRegistry::new()),
//!     Arc::new(InMemoryAlertStore::new()),
//! );
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod assistant;
pub mod dispatch;
pub mod domain;
pub mod fusion;
pub mod hub;
pub mod matcher;
pub mod pipeline;
pub mod store;

use assistant::GuidanceConfig;
use dispatch::DispatchConfig;
use fusion::FusionConfig;
use hub::HubConfig;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Unified error for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum CareError {
    /// Invalid detection signal
    #[error(transparent)]
    Signal(#[from] domain::SignalError),

    /// Dispatch orchestration failure
    #[error(transparent)]
    Dispatch(#[from] dispatch::DispatchError),

    /// Illegal alert state transition
    #[error(transparent)]
    AlertState(#[from] domain::AlertStateError),

    /// Storage backend failure
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// I/O failure
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CareError>;

/// Top-level configuration for the assembled pipeline.
#[derive(Debug, Clone, Default)]
pub struct CareConfig {
    /// Signal fusion and tiering
    pub fusion: FusionConfig,
    /// Dispatch and escalation
    pub dispatch: DispatchConfig,
    /// Connection hub
    pub hub: HubConfig,
    /// Guidance sequence
    pub guidance: GuidanceConfig,
}

impl CareConfig {
    /// Create a configuration builder.
    pub fn builder() -> CareConfigBuilder {
        CareConfigBuilder::default()
    }
}

/// Builder for [`CareConfig`].
#[derive(Debug, Default)]
pub struct CareConfigBuilder {
    config: CareConfig,
}

impl CareConfigBuilder {
    /// Set the fusion configuration.
    pub fn fusion(mut self, fusion: FusionConfig) -> Self {
        self.config.fusion = fusion;
        self
    }

    /// Set the dispatch configuration.
    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.config.dispatch = dispatch;
        self
    }

    /// Set the hub configuration.
    pub fn hub(mut self, hub: HubConfig) -> Self {
        self.config.hub = hub;
        self
    }

    /// Set the guidance configuration.
    pub fn guidance(mut self, guidance: GuidanceConfig) -> Self {
        self.config.guidance = guidance;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> CareConfig {
        self.config
    }
}

/// Commonly used types.
pub mod prelude {
    pub use crate::api::{create_router, AppState};
    pub use crate::dispatch::{
        AlertDispatchOrchestrator, DispatchConfig, DispatchError, LoggingChannel,
        NotificationChannel, RetryPolicy,
    };
    pub use crate::domain::{
        AlertId, AlertRecord, AlertStatus, ChannelKind, Contact, DecisionSource, DecisionTier,
        DetectionSignal, FusedDecision, GeoPoint, Modality, Responder, ResponderId, ResponderRole,
        UserId, UserProfile,
    };
    pub use crate::fusion::{DetectionFusionEngine, FusionConfig, FusionOutcome};
    pub use crate::hub::{Audience, ClientRole, ConnectionHub, Envelope, HubConfig};
    pub use crate::matcher::{EmergencyNetworkMatcher, InMemoryResponderRegistry};
    pub use crate::pipeline::CarePipeline;
    pub use crate::store::{AlertStore, InMemoryAlertStore};
    pub use crate::{CareConfig, CareError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder_overrides() {
        let config = CareConfig::builder()
            .fusion(FusionConfig::builder().cooldown_secs(5).build())
            .build();
        assert_eq!(config.fusion.cooldown_secs, 5);
        // Untouched sections keep their defaults.
        assert_eq!(config.dispatch.retry.max_attempts, 3);
        assert_eq!(config.hub.queue_capacity, 32);
        assert_eq!(config.guidance.steps.len(), 4);
    }
}
