//! The alert dispatch orchestrator.
//!
//! Each open alert is driven by a single task that owns the alert
//! record, so every status transition has exactly one writer. External
//! actors (acknowledgments, responder replies, administrative closes)
//! reach the driver through a command channel; delivery and guidance
//! work run as child tasks under the alert's cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::assistant::{spawn_guidance, GuidanceConfig};
use crate::domain::{
    AlertId, AlertRecord, AlertStateError, AlertStatus, AssignmentState, AttemptStatus, Contact,
    ContactTier, DecisionSource, GeoPoint, NotificationAttempt, ResponderAssignment, ResponderId,
    ResponderRole, TierKind, UserId, UserProfile,
};
use crate::fusion::DetectionFusionEngine;
use crate::hub::{Audience, ConnectionHub, Envelope};
use crate::matcher::{EmergencyNetworkMatcher, RankedResponder};
use crate::store::AlertStore;

use super::channel::NotificationChannel;
use super::retry::RetryPolicy;

/// Dispatch and escalation tuning knobs.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Per-contact, per-channel retry schedule
    pub retry: RetryPolicy,
    /// Seconds to wait for an acknowledgment before escalating a tier
    pub tier_ack_timeout_secs: u64,
    /// Seconds a responder has to answer an offer
    pub offer_timeout_secs: u64,
    /// Search radius for responder matching in kilometers
    pub responder_radius_km: f64,
    /// Maximum responder candidates per alert
    pub responder_candidates: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            tier_ack_timeout_secs: 30,
            offer_timeout_secs: 15,
            responder_radius_km: 2.0,
            responder_candidates: 5,
        }
    }
}

/// Error from the dispatch orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The user already has a non-terminal alert
    #[error("user {user_id} already has open alert {alert_id}")]
    AlreadyOpen {
        /// User with the open alert
        user_id: UserId,
        /// The open alert
        alert_id: AlertId,
    },

    /// No live driver for the alert id
    #[error("unknown or finished alert {0}")]
    UnknownAlert(AlertId),

    /// Illegal status transition
    #[error(transparent)]
    State(#[from] AlertStateError),
}

/// Commands routed to an alert's driver task.
#[derive(Debug)]
enum AlertCommand {
    Acknowledge { by: String },
    Close { by: String },
    ResponderReply { responder_id: ResponderId, accepted: bool },
    GuidanceAck,
}

struct AlertHandle {
    cmd_tx: mpsc::Sender<AlertCommand>,
    cancel: CancellationToken,
}

/// Per-attempt report from a delivery task back to its driver.
struct AttemptOutcome {
    delivered: bool,
    /// No further attempts will follow for this contact and channel
    last: bool,
}

/// Drives the full lifecycle of every open alert.
pub struct AlertDispatchOrchestrator {
    config: DispatchConfig,
    guidance: GuidanceConfig,
    channels: Vec<Arc<dyn NotificationChannel>>,
    matcher: EmergencyNetworkMatcher,
    store: Arc<dyn AlertStore>,
    hub: Arc<ConnectionHub>,
    engine: Arc<DetectionFusionEngine>,
    active: RwLock<HashMap<AlertId, AlertHandle>>,
    open_users: RwLock<HashMap<UserId, AlertId>>,
}

impl AlertDispatchOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        config: DispatchConfig,
        guidance: GuidanceConfig,
        channels: Vec<Arc<dyn NotificationChannel>>,
        matcher: EmergencyNetworkMatcher,
        store: Arc<dyn AlertStore>,
        hub: Arc<ConnectionHub>,
        engine: Arc<DetectionFusionEngine>,
    ) -> Self {
        Self {
            config,
            guidance,
            channels,
            matcher,
            store,
            hub,
            engine,
            active: RwLock::new(HashMap::new()),
            open_users: RwLock::new(HashMap::new()),
        }
    }

    /// Open an alert for a user and start its driver task.
    ///
    /// At most one non-terminal alert may exist per user.
    pub fn open_alert(
        self: &Arc<Self>,
        user_id: UserId,
        location: Option<GeoPoint>,
        source: DecisionSource,
        score: f64,
        profile: UserProfile,
    ) -> Result<AlertId, DispatchError> {
        {
            let mut open = self.open_users.write();
            if let Some(existing) = open.get(&user_id) {
                return Err(DispatchError::AlreadyOpen {
                    user_id,
                    alert_id: *existing,
                });
            }
            let record =
                AlertRecord::new(user_id.clone(), location.or(profile.location), source);
            open.insert(user_id.clone(), record.id);

            let (cmd_tx, cmd_rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();
            self.active.write().insert(
                record.id,
                AlertHandle {
                    cmd_tx,
                    cancel: cancel.clone(),
                },
            );
            self.engine.note_alert_opened(&user_id);

            let alert_id = record.id;
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.drive(record, score, profile, cmd_rx, cancel).await;
            });

            tracing::info!(
                alert_id = %alert_id,
                user_id = %user_id,
                source = ?source,
                score,
                "Alert opened"
            );
            Ok(alert_id)
        }
    }

    /// Acknowledge an alert, resolving it.
    pub async fn acknowledge(
        &self,
        alert_id: AlertId,
        by: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.send_command(alert_id, AlertCommand::Acknowledge { by: by.into() })
            .await
    }

    /// Administratively close an alert (e.g. confirmed false alarm).
    pub async fn close(
        &self,
        alert_id: AlertId,
        by: impl Into<String>,
    ) -> Result<(), DispatchError> {
        self.send_command(alert_id, AlertCommand::Close { by: by.into() })
            .await
    }

    /// Route a responder's answer to the alert's offer queue.
    pub async fn responder_reply(
        &self,
        alert_id: AlertId,
        responder_id: ResponderId,
        accepted: bool,
    ) -> Result<(), DispatchError> {
        self.send_command(
            alert_id,
            AlertCommand::ResponderReply {
                responder_id,
                accepted,
            },
        )
        .await
    }

    /// Advance the alert's guidance sequence past the current step.
    pub async fn guidance_ack(&self, alert_id: AlertId) -> Result<(), DispatchError> {
        self.send_command(alert_id, AlertCommand::GuidanceAck).await
    }

    /// Cancel every live alert driver, e.g. on shutdown.
    pub fn shutdown(&self) {
        for handle in self.active.read().values() {
            handle.cancel.cancel();
        }
    }

    /// Whether an alert still has a live driver.
    pub fn is_active(&self, alert_id: &AlertId) -> bool {
        self.active.read().contains_key(alert_id)
    }

    /// Number of alerts with live drivers.
    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    /// The open alert for a user, if any.
    pub fn open_alert_for(&self, user_id: &UserId) -> Option<AlertId> {
        self.open_users.read().get(user_id).copied()
    }

    async fn send_command(
        &self,
        alert_id: AlertId,
        command: AlertCommand,
    ) -> Result<(), DispatchError> {
        let cmd_tx = {
            let active = self.active.read();
            active
                .get(&alert_id)
                .map(|handle| handle.cmd_tx.clone())
                .ok_or(DispatchError::UnknownAlert(alert_id))?
        };
        cmd_tx
            .send(command)
            .await
            .map_err(|_| DispatchError::UnknownAlert(alert_id))
    }

    /// Single-writer lifecycle loop for one alert.
    async fn drive(
        self: Arc<Self>,
        mut record: AlertRecord,
        score: f64,
        profile: UserProfile,
        mut cmd_rx: mpsc::Receiver<AlertCommand>,
        cancel: CancellationToken,
    ) {
        let alert_id = record.id;
        let user_id = record.user_id.clone();

        if let Err(e) = self.store.create_alert(&record).await {
            tracing::error!(alert_id = %alert_id, error = %e, "Failed to persist alert");
        }
        self.hub.broadcast(
            &Audience::All,
            &Envelope::FallDetected {
                alert_id,
                user_id: user_id.clone(),
                score,
                decision_source: record.decision_source,
                location: record.location,
                timestamp: record.created_at,
            },
        );

        self.apply_transition(&mut record, AlertStatus::Dispatching)
            .await;

        let guidance = spawn_guidance(
            Arc::clone(&self.hub),
            alert_id,
            user_id.clone(),
            self.guidance.clone(),
            cancel.child_token(),
        );

        let ranked = match record.location {
            Some(location) => {
                self.matcher
                    .rank(
                        location,
                        ResponderRole::Volunteer,
                        self.config.responder_radius_km,
                        self.config.responder_candidates,
                    )
                    .await
            }
            None => Vec::new(),
        };

        let (reply_tx, reply_rx) = mpsc::channel(8);
        if !ranked.is_empty() {
            self.spawn_offer_queue(alert_id, ranked.clone(), reply_rx, cancel.child_token());
        }

        let tiers = build_tiers(&profile, &ranked);
        let message = alert_message(&record);

        'tiers: for tier in &tiers {
            self.hub.broadcast(
                &Audience::All,
                &Envelope::status_update(
                    Some(alert_id),
                    Some(user_id.clone()),
                    format!("notifying_{}", tier.kind),
                    None,
                ),
            );

            let tier_cancel = cancel.child_token();
            let (outcome_tx, mut outcome_rx) = mpsc::channel(64);
            let mut outstanding =
                self.spawn_tier_deliveries(&record, tier, &message, &outcome_tx, &tier_cancel);
            drop(outcome_tx);
            if outstanding == 0 {
                tracing::warn!(alert_id = %alert_id, tier = %tier.kind, "Tier has no reachable contacts");
                continue;
            }

            let ack_timeout = Duration::from_secs(self.config.tier_ack_timeout_secs);
            let ack_deadline = tokio::time::Instant::now() + ack_timeout;
            // Grace so in-flight retries can finish before escalation.
            let hard_deadline = ack_deadline + ack_timeout;
            let ack_sleep = tokio::time::sleep_until(ack_deadline);
            let hard_sleep = tokio::time::sleep_until(hard_deadline);
            tokio::pin!(ack_sleep, hard_sleep);
            let mut ack_elapsed = false;

            loop {
                tokio::select! {
                    _ = &mut ack_sleep, if !ack_elapsed => {
                        ack_elapsed = true;
                        if outstanding == 0 {
                            break;
                        }
                    }
                    _ = &mut hard_sleep => {
                        tracing::warn!(
                            alert_id = %alert_id,
                            tier = %tier.kind,
                            "Escalating with deliveries still in flight"
                        );
                        break;
                    }
                    // Every delivery task reports a final `last` outcome
                    // before exiting; the branch disables once the
                    // channel closes.
                    Some(outcome) = outcome_rx.recv() => {
                        if outcome.delivered && record.status() == AlertStatus::Dispatching {
                            self.apply_transition(&mut record, AlertStatus::PartialSuccess)
                                .await;
                        }
                        if outcome.last {
                            outstanding -= 1;
                        }
                        if ack_elapsed && outstanding == 0 {
                            break;
                        }
                    }
                    Some(command) = cmd_rx.recv() => {
                        match command {
                            AlertCommand::Acknowledge { by } => {
                                match record.acknowledge(&by) {
                                    Ok(()) => {
                                        if let Err(e) = self.store.update_alert(&record).await {
                                            tracing::error!(alert_id = %alert_id, error = %e, "Failed to persist status");
                                        }
                                        self.hub.broadcast(
                                            &Audience::All,
                                            &Envelope::status_update(
                                                Some(alert_id),
                                                Some(user_id.clone()),
                                                AlertStatus::Resolved.to_string(),
                                                Some(format!("acknowledged by {by}")),
                                            ),
                                        );
                                        tracing::info!(alert_id = %alert_id, by = %by, "Alert acknowledged");
                                    }
                                    Err(e) => {
                                        tracing::warn!(alert_id = %alert_id, error = %e, "Acknowledge rejected");
                                    }
                                }
                                break 'tiers;
                            }
                            AlertCommand::Close { by } => {
                                self.apply_transition(&mut record, AlertStatus::Closed).await;
                                tracing::info!(alert_id = %alert_id, by = %by, "Alert closed");
                                break 'tiers;
                            }
                            AlertCommand::ResponderReply { responder_id, accepted } => {
                                let _ = reply_tx.try_send((responder_id, accepted));
                            }
                            AlertCommand::GuidanceAck => {
                                guidance.advance();
                            }
                        }
                    }
                    _ = cancel.cancelled() => {
                        break 'tiers;
                    }
                }
            }
            tier_cancel.cancel();
        }

        if !record.is_terminal() {
            tracing::error!(
                alert_id = %alert_id,
                user_id = %user_id,
                "All escalation tiers exhausted without acknowledgment"
            );
            self.apply_transition(&mut record, AlertStatus::Failed).await;
        }

        cancel.cancel();
        self.active.write().remove(&alert_id);
        self.open_users.write().remove(&user_id);
        self.engine.note_alert_closed(&user_id);
        tracing::info!(
            alert_id = %alert_id,
            user_id = %user_id,
            status = %record.status(),
            "Alert driver finished"
        );
    }

    /// Apply and persist a transition; both failure cases are logged
    /// and non-fatal.
    async fn apply_transition(&self, record: &mut AlertRecord, next: AlertStatus) {
        if let Err(e) = record.transition(next) {
            tracing::warn!(alert_id = %record.id, error = %e, "Transition rejected");
            return;
        }
        if let Err(e) = self.store.update_alert(record).await {
            tracing::error!(alert_id = %record.id, error = %e, "Failed to persist status");
        }
        self.hub.broadcast(
            &Audience::All,
            &Envelope::status_update(
                Some(record.id),
                Some(record.user_id.clone()),
                next.to_string(),
                None,
            ),
        );
    }

    /// Spawn one delivery task per contact and configured channel in the
    /// tier; returns how many were spawned.
    fn spawn_tier_deliveries(
        &self,
        record: &AlertRecord,
        tier: &ContactTier,
        message: &str,
        outcome_tx: &mpsc::Sender<AttemptOutcome>,
        cancel: &CancellationToken,
    ) -> usize {
        let mut spawned = 0;
        for contact in &tier.contacts {
            for channel in &self.channels {
                let Some(address) = contact.address_for(channel.kind()) else {
                    continue;
                };
                spawned += 1;
                let task = DeliveryTask {
                    alert_id: record.id,
                    channel: Arc::clone(channel),
                    address: address.to_string(),
                    message: message.to_string(),
                    policy: self.config.retry.clone(),
                    store: Arc::clone(&self.store),
                    hub: Arc::clone(&self.hub),
                    outcome_tx: outcome_tx.clone(),
                    cancel: cancel.child_token(),
                };
                tokio::spawn(task.run());
            }
        }
        spawned
    }

    /// Offer the alert to ranked responders one at a time.
    fn spawn_offer_queue(
        self: &Arc<Self>,
        alert_id: AlertId,
        candidates: Vec<RankedResponder>,
        mut reply_rx: mpsc::Receiver<(ResponderId, bool)>,
        cancel: CancellationToken,
    ) {
        let hub = Arc::clone(&self.hub);
        let offer_timeout = Duration::from_secs(self.config.offer_timeout_secs);
        tokio::spawn(async move {
            for candidate in candidates {
                let responder = &candidate.responder;
                let mut assignment =
                    ResponderAssignment::offer(alert_id, responder.id, candidate.distance_km);
                hub.send_to_client(
                    &responder.id.to_string(),
                    &Envelope::status_update(
                        Some(alert_id),
                        None,
                        "responder_offer",
                        Some(format!(
                            "fall alert {:.2} km away, reply within {}s",
                            candidate.distance_km,
                            offer_timeout.as_secs()
                        )),
                    ),
                );
                tracing::info!(
                    alert_id = %alert_id,
                    responder_id = %responder.id,
                    distance_km = candidate.distance_km,
                    "Responder offer sent"
                );

                // Fixed deadline; late replies from earlier offers must
                // not extend this candidate's window.
                let offer_sleep =
                    tokio::time::sleep_until(tokio::time::Instant::now() + offer_timeout);
                tokio::pin!(offer_sleep);
                while !assignment.state.is_settled() {
                    tokio::select! {
                        reply = reply_rx.recv() => match reply {
                            Some((responder_id, accepted)) => {
                                if responder_id != responder.id {
                                    continue;
                                }
                                assignment.settle(if accepted {
                                    AssignmentState::Accepted
                                } else {
                                    AssignmentState::Declined
                                });
                            }
                            None => return,
                        },
                        _ = &mut offer_sleep => assignment.settle(AssignmentState::TimedOut),
                        _ = cancel.cancelled() => return,
                    }
                }

                match assignment.state {
                    AssignmentState::Accepted => {
                        hub.broadcast(
                            &Audience::All,
                            &Envelope::status_update(
                                Some(alert_id),
                                None,
                                "responder_accepted",
                                Some(format!("{} is on the way", responder.name)),
                            ),
                        );
                        tracing::info!(
                            alert_id = %alert_id,
                            responder_id = %responder.id,
                            "Responder accepted"
                        );
                        return;
                    }
                    state => {
                        tracing::debug!(
                            alert_id = %alert_id,
                            responder_id = %responder.id,
                            ?state,
                            "Offer not accepted, trying next candidate"
                        );
                    }
                }
            }
            tracing::info!(alert_id = %alert_id, "Responder offer queue exhausted");
        });
    }
}

/// One contact-channel delivery with retries.
struct DeliveryTask {
    alert_id: AlertId,
    channel: Arc<dyn NotificationChannel>,
    address: String,
    message: String,
    policy: RetryPolicy,
    store: Arc<dyn AlertStore>,
    hub: Arc<ConnectionHub>,
    outcome_tx: mpsc::Sender<AttemptOutcome>,
    cancel: CancellationToken,
}

impl DeliveryTask {
    async fn run(self) {
        let mut attempt_no = 1;
        while let Some(delay) = self.policy.delay_before(attempt_no) {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => return,
            }

            let result = self.channel.send(&self.address, &self.message).await;
            let delivered = result.is_ok();
            if let Err(e) = &result {
                tracing::warn!(
                    alert_id = %self.alert_id,
                    channel = %self.channel.kind(),
                    attempt_no,
                    error = %e,
                    "Delivery attempt failed"
                );
            }

            let attempt = NotificationAttempt {
                alert_id: self.alert_id,
                channel: self.channel.kind(),
                target_contact: self.address.clone(),
                attempt_no,
                status: if delivered {
                    AttemptStatus::Sent
                } else {
                    AttemptStatus::Failed
                },
                timestamp: Utc::now(),
            };
            if let Err(e) = self.store.append_notification_attempt(&attempt).await {
                tracing::error!(alert_id = %self.alert_id, error = %e, "Failed to persist attempt");
            }
            self.hub.broadcast(
                &Audience::All,
                &Envelope::AlertSent {
                    alert_id: self.alert_id,
                    channel: self.channel.kind(),
                    target_contact: self.address.clone(),
                    attempt_no,
                    delivered,
                },
            );

            let last = delivered || attempt_no == self.policy.max_attempts;
            let _ = self
                .outcome_tx
                .send(AttemptOutcome { delivered, last })
                .await;
            if delivered {
                return;
            }
            attempt_no += 1;
        }
    }
}

/// Escalation ladder for one alert, skipping empty tiers.
fn build_tiers(profile: &UserProfile, ranked: &[RankedResponder]) -> Vec<ContactTier> {
    let mut tiers = Vec::new();
    if !profile.caregivers.is_empty() {
        tiers.push(ContactTier {
            kind: TierKind::Caregiver,
            contacts: profile.caregivers.clone(),
        });
    }
    if !ranked.is_empty() {
        tiers.push(ContactTier {
            kind: TierKind::Responder,
            contacts: ranked
                .iter()
                .map(|c| {
                    Contact::new(c.responder.name.clone())
                        .with_address(crate::domain::ChannelKind::Sms, c.responder.phone.clone())
                })
                .collect(),
        });
    }
    if !profile.emergency.is_empty() {
        tiers.push(ContactTier {
            kind: TierKind::Emergency,
            contacts: profile.emergency.clone(),
        });
    }
    tiers
}

fn alert_message(record: &AlertRecord) -> String {
    match record.location {
        Some(location) => format!(
            "Fall detected for user {} near {}. Please check on them now.",
            record.user_id, location
        ),
        None => format!(
            "Fall detected for user {}. Please check on them now.",
            record.user_id
        ),
    }
}
