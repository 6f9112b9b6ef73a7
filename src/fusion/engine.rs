//! The detection fusion engine.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};

use crate::domain::{DecisionTier, DetectionSignal, FusedDecision, Modality, UserId};

use super::buffer::FusionBuffer;

/// What to do when a decision lands in the `suspected` tier.
///
/// Source behavior is inconsistent on this point, so it is a policy
/// rather than a hardcoded choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspectedPolicy {
    /// Record a log entry only
    LogOnly,
    /// Send a lightweight check-in notification to the caregiver audience
    NotifyCaregiver,
}

/// Configuration for signal fusion and tiering.
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Weight of the video confidence (0.0-1.0)
    pub video_weight: f64,
    /// Weight of the audio confidence (0.0-1.0)
    pub audio_weight: f64,
    /// Confirm threshold when both modalities contribute
    pub dual_confirm_threshold: f64,
    /// Confirm threshold when a single modality contributes
    pub single_confirm_threshold: f64,
    /// Lower bound of the `suspected` tier
    pub suspect_threshold: f64,
    /// Sliding window for signal freshness in milliseconds
    pub window_ms: u64,
    /// Debounce cooldown after an alert closes, in seconds
    pub cooldown_secs: u64,
    /// Behavior for `suspected` decisions
    pub suspected_policy: SuspectedPolicy,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            video_weight: 0.5,
            audio_weight: 0.5,
            dual_confirm_threshold: 0.80,
            single_confirm_threshold: 0.85,
            suspect_threshold: 0.60,
            window_ms: 2_000,
            cooldown_secs: 30,
            suspected_policy: SuspectedPolicy::LogOnly,
        }
    }
}

impl FusionConfig {
    /// Create a configuration builder.
    pub fn builder() -> FusionConfigBuilder {
        FusionConfigBuilder::default()
    }

    fn window(&self) -> Duration {
        Duration::milliseconds(self.window_ms as i64)
    }

    fn cooldown(&self) -> Duration {
        Duration::seconds(self.cooldown_secs as i64)
    }
}

/// Builder for [`FusionConfig`].
#[derive(Debug, Default)]
pub struct FusionConfigBuilder {
    config: FusionConfig,
}

impl FusionConfigBuilder {
    /// Set modality weights.
    pub fn weights(mut self, video: f64, audio: f64) -> Self {
        self.config.video_weight = video.clamp(0.0, 1.0);
        self.config.audio_weight = audio.clamp(0.0, 1.0);
        self
    }

    /// Set the dual-modality confirm threshold.
    pub fn dual_confirm_threshold(mut self, threshold: f64) -> Self {
        self.config.dual_confirm_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the single-modality confirm threshold.
    pub fn single_confirm_threshold(mut self, threshold: f64) -> Self {
        self.config.single_confirm_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the lower bound of the `suspected` tier.
    pub fn suspect_threshold(mut self, threshold: f64) -> Self {
        self.config.suspect_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the signal freshness window.
    pub fn window_ms(mut self, window_ms: u64) -> Self {
        self.config.window_ms = window_ms.max(100);
        self
    }

    /// Set the post-alert cooldown.
    pub fn cooldown_secs(mut self, cooldown_secs: u64) -> Self {
        self.config.cooldown_secs = cooldown_secs;
        self
    }

    /// Set the `suspected`-tier policy.
    pub fn suspected_policy(mut self, policy: SuspectedPolicy) -> Self {
        self.config.suspected_policy = policy;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> FusionConfig {
        self.config
    }
}

/// Result of ingesting one signal.
#[derive(Debug, Clone)]
pub enum FusionOutcome {
    /// Decision emitted for the orchestrator to act on
    Emit(FusedDecision),
    /// Confirmed decision suppressed by the debounce window
    Suppressed(FusedDecision),
    /// No fresh signal to evaluate
    Empty,
}

/// Per-user debounce bookkeeping.
#[derive(Debug, Clone, Copy)]
enum DebounceState {
    /// A non-terminal alert is open for the user
    AlertOpen,
    /// The last alert closed; suppress until this instant
    CoolingDown(DateTime<Utc>),
}

/// Combines per-user, per-modality signals into graded decisions.
///
/// Buffers are independently owned per user behind a keyed accessor, so
/// concurrent evaluation for different users never contends.
pub struct DetectionFusionEngine {
    config: FusionConfig,
    buffers: RwLock<HashMap<UserId, Arc<Mutex<FusionBuffer>>>>,
    debounce: Mutex<HashMap<UserId, DebounceState>>,
}

impl DetectionFusionEngine {
    /// Create an engine with the given configuration.
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            buffers: RwLock::new(HashMap::new()),
            debounce: Mutex::new(HashMap::new()),
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Ingest a validated signal and re-evaluate the user's decision.
    ///
    /// The signal's own timestamp anchors the freshness window, keeping
    /// evaluation deterministic for replayed input.
    pub fn ingest(&self, signal: DetectionSignal) -> FusionOutcome {
        let user_id = signal.user_id.clone();
        let now = signal.timestamp;

        let buffer = self.buffer_for(&user_id);
        let decision = {
            let mut buffer = buffer.lock();
            buffer.insert(signal);
            buffer.prune(now, self.config.window());
            self.evaluate_buffer(&user_id, &buffer, now)
        };

        let Some(decision) = decision else {
            return FusionOutcome::Empty;
        };

        if decision.tier == DecisionTier::Confirmed && self.is_debounced(&user_id, now) {
            tracing::debug!(
                user_id = %user_id,
                score = decision.score,
                "Confirmed decision suppressed by debounce"
            );
            return FusionOutcome::Suppressed(decision);
        }

        FusionOutcome::Emit(decision)
    }

    /// Re-evaluate a user's buffered signals against the current time.
    pub fn evaluate(&self, user_id: &UserId) -> Option<FusedDecision> {
        let buffer = self.buffers.read().get(user_id)?.clone();
        let buffer = buffer.lock();
        self.evaluate_buffer(user_id, &buffer, Utc::now())
    }

    /// Record that an alert opened for a user; confirmed decisions are
    /// suppressed until the alert closes plus the cooldown.
    pub fn note_alert_opened(&self, user_id: &UserId) {
        self.debounce
            .lock()
            .insert(user_id.clone(), DebounceState::AlertOpen);
    }

    /// Record that a user's alert reached a terminal state; suppression
    /// continues for the configured cooldown.
    pub fn note_alert_closed(&self, user_id: &UserId) {
        let until = Utc::now() + self.config.cooldown();
        self.debounce
            .lock()
            .insert(user_id.clone(), DebounceState::CoolingDown(until));
    }

    fn buffer_for(&self, user_id: &UserId) -> Arc<Mutex<FusionBuffer>> {
        if let Some(buffer) = self.buffers.read().get(user_id) {
            return buffer.clone();
        }
        self.buffers
            .write()
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(FusionBuffer::new())))
            .clone()
    }

    fn is_debounced(&self, user_id: &UserId, now: DateTime<Utc>) -> bool {
        let mut debounce = self.debounce.lock();
        match debounce.get(user_id) {
            Some(DebounceState::AlertOpen) => true,
            Some(DebounceState::CoolingDown(until)) => {
                if now < *until {
                    true
                } else {
                    debounce.remove(user_id);
                    false
                }
            }
            None => false,
        }
    }

    fn evaluate_buffer(
        &self,
        user_id: &UserId,
        buffer: &FusionBuffer,
        now: DateTime<Utc>,
    ) -> Option<FusedDecision> {
        let window = self.config.window();
        let video = buffer.fresh(Modality::Video, now, window);
        let audio = buffer.fresh(Modality::Audio, now, window);

        let (score, contributing, confirm_threshold) = match (video, audio) {
            (Some(v), Some(a)) => {
                let total = self.config.video_weight + self.config.audio_weight;
                let score = if total > 0.0 {
                    (v.confidence * self.config.video_weight
                        + a.confidence * self.config.audio_weight)
                        / total
                } else {
                    0.0
                };
                (
                    score,
                    vec![Modality::Video, Modality::Audio],
                    self.config.dual_confirm_threshold,
                )
            }
            (Some(v), None) => (
                v.confidence,
                vec![Modality::Video],
                self.config.single_confirm_threshold,
            ),
            (None, Some(a)) => (
                a.confidence,
                vec![Modality::Audio],
                self.config.single_confirm_threshold,
            ),
            (None, None) => return None,
        };

        let tier = if score >= confirm_threshold {
            DecisionTier::Confirmed
        } else if score >= self.config.suspect_threshold {
            DecisionTier::Suspected
        } else {
            DecisionTier::Normal
        };

        Some(FusedDecision {
            user_id: user_id.clone(),
            score,
            contributing_modalities: contributing,
            tier,
            timestamp: now,
        })
    }
}
