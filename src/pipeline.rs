//! The assembled detection-to-dispatch pipeline.
//!
//! Owns the fusion engine, the dispatch orchestrator, the connection
//! hub and the per-user dispatch profiles, and routes events between
//! them. This is the type the transport layer talks to.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{AlertDispatchOrchestrator, DispatchError, NotificationChannel};
use crate::domain::{
    AlertId, DecisionSource, DecisionTier, DetectionSignal, GeoPoint, ResponderId, UserId,
    UserProfile,
};
use crate::fusion::{DetectionFusionEngine, FusionOutcome, SuspectedPolicy};
use crate::hub::{Audience, ClientRole, ConnectionHub, Envelope};
use crate::matcher::{EmergencyNetworkMatcher, ResponderRegistry};
use crate::store::AlertStore;
use crate::CareConfig;

/// End-to-end pipeline from detection signals to dispatched alerts.
pub struct CarePipeline {
    engine: Arc<DetectionFusionEngine>,
    orchestrator: Arc<AlertDispatchOrchestrator>,
    hub: Arc<ConnectionHub>,
    profiles: RwLock<HashMap<UserId, UserProfile>>,
    cancel: CancellationToken,
}

impl CarePipeline {
    /// Assemble a pipeline from configuration and backends.
    pub fn new(
        config: CareConfig,
        channels: Vec<Arc<dyn NotificationChannel>>,
        registry: Arc<dyn ResponderRegistry>,
        store: Arc<dyn AlertStore>,
    ) -> Arc<Self> {
        let cancel = CancellationToken::new();
        let hub = Arc::new(ConnectionHub::new(config.hub));
        let _ = hub.spawn_reaper(cancel.child_token());
        let engine = Arc::new(DetectionFusionEngine::new(config.fusion));
        let orchestrator = Arc::new(AlertDispatchOrchestrator::new(
            config.dispatch,
            config.guidance,
            channels,
            EmergencyNetworkMatcher::new(registry),
            store,
            Arc::clone(&hub),
            Arc::clone(&engine),
        ));
        Arc::new(Self {
            engine,
            orchestrator,
            hub,
            profiles: RwLock::new(HashMap::new()),
            cancel,
        })
    }

    /// Stop background work: the hub reaper and every live alert driver.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.orchestrator.shutdown();
    }

    /// Install or replace a user's dispatch profile.
    pub fn upsert_profile(&self, user_id: UserId, profile: UserProfile) {
        self.profiles.write().insert(user_id, profile);
    }

    /// Feed one detection signal through fusion and, when it confirms a
    /// fall, open an alert. Returns the alert id when one was opened.
    pub fn ingest_signal(&self, signal: DetectionSignal) -> Result<Option<AlertId>, DispatchError> {
        match self.engine.ingest(signal) {
            FusionOutcome::Emit(decision) if decision.is_confirmed() => {
                let profile = self.profile_for(&decision.user_id);
                match self.orchestrator.open_alert(
                    decision.user_id.clone(),
                    None,
                    DecisionSource::Fused,
                    decision.score,
                    profile,
                ) {
                    Ok(alert_id) => Ok(Some(alert_id)),
                    // Lost a race with another confirmed decision for
                    // the same user; the open alert already covers it.
                    Err(DispatchError::AlreadyOpen { alert_id, .. }) => {
                        tracing::debug!(
                            alert_id = %alert_id,
                            "Confirmed decision folded into open alert"
                        );
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
            FusionOutcome::Emit(decision) if decision.tier == DecisionTier::Suspected => {
                match self.engine.config().suspected_policy {
                    SuspectedPolicy::LogOnly => {
                        tracing::info!(
                            user_id = %decision.user_id,
                            score = decision.score,
                            "Suspected fall, monitoring"
                        );
                    }
                    SuspectedPolicy::NotifyCaregiver => {
                        self.hub.broadcast(
                            &Audience::Role(ClientRole::Caregiver),
                            &Envelope::status_update(
                                None,
                                Some(decision.user_id.clone()),
                                "check_in",
                                Some(format!(
                                    "possible fall (score {:.2}), please check in",
                                    decision.score
                                )),
                            ),
                        );
                    }
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Open an alert directly, bypassing fusion and its debounce.
    pub fn trigger_manual(
        &self,
        user_id: UserId,
        location: Option<GeoPoint>,
        note: Option<String>,
    ) -> Result<AlertId, DispatchError> {
        if let Some(note) = &note {
            tracing::info!(user_id = %user_id, note, "Manual emergency trigger");
        }
        let profile = self.profile_for(&user_id);
        self.orchestrator
            .open_alert(user_id, location, DecisionSource::Manual, 1.0, profile)
    }

    /// Acknowledge an alert, resolving it.
    pub async fn acknowledge(
        &self,
        alert_id: AlertId,
        by: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.orchestrator.acknowledge(alert_id, by).await
    }

    /// Administratively close an alert.
    pub async fn close(
        &self,
        alert_id: AlertId,
        by: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.orchestrator.close(alert_id, by).await
    }

    /// Advance an alert's guidance sequence past the current step.
    pub async fn guidance_ack(&self, alert_id: AlertId) -> Result<(), DispatchError> {
        self.orchestrator.guidance_ack(alert_id).await
    }

    /// Route a responder's answer to an outstanding offer.
    pub async fn responder_reply(
        &self,
        alert_id: AlertId,
        responder_id: ResponderId,
        accepted: bool,
    ) -> Result<(), DispatchError> {
        self.orchestrator
            .responder_reply(alert_id, responder_id, accepted)
            .await
    }

    /// The connection hub.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// The fusion engine.
    pub fn engine(&self) -> &Arc<DetectionFusionEngine> {
        &self.engine
    }

    /// The dispatch orchestrator.
    pub fn orchestrator(&self) -> &Arc<AlertDispatchOrchestrator> {
        &self.orchestrator
    }

    fn profile_for(&self, user_id: &UserId) -> UserProfile {
        self.profiles
            .read()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}
