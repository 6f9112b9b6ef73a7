//! Step-by-step guidance delivered to the user's device while an alert
//! is open.
//!
//! Steps advance on a timer or when the device acknowledges one; the
//! whole sequence stops as soon as the owning alert is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::domain::{AlertId, UserId};
use crate::hub::{Audience, ConnectionHub, Envelope};

/// One guidance step.
#[derive(Debug, Clone)]
pub struct GuidanceStep {
    /// Prompt text presented on the user's device
    pub prompt: String,
}

/// Guidance sequence configuration.
#[derive(Debug, Clone)]
pub struct GuidanceConfig {
    /// Seconds before auto-advancing to the next step
    pub step_interval_secs: u64,
    /// Ordered steps
    pub steps: Vec<GuidanceStep>,
}

impl Default for GuidanceConfig {
    fn default() -> Self {
        let prompts = [
            "Help is being contacted. Can you hear me? Try to stay calm.",
            "If you can move, try to roll onto your side and rest there.",
            "Take slow, deep breaths. Do not try to stand up quickly.",
            "Someone has been notified and is on the way. Stay where you are.",
        ];
        Self {
            step_interval_secs: 20,
            steps: prompts
                .into_iter()
                .map(|prompt| GuidanceStep {
                    prompt: prompt.to_string(),
                })
                .collect(),
        }
    }
}

/// Control signal for a running guidance sequence.
#[derive(Debug)]
pub enum GuidanceSignal {
    /// Device acknowledged the current step; move on
    Advance,
    /// Repeat the current step
    Resend,
}

/// Handle to a running guidance sequence.
pub struct GuidanceHandle {
    signal_tx: mpsc::Sender<GuidanceSignal>,
    task: JoinHandle<()>,
}

impl GuidanceHandle {
    /// Advance past the current step.
    pub fn advance(&self) {
        let _ = self.signal_tx.try_send(GuidanceSignal::Advance);
    }

    /// Repeat the current step.
    pub fn resend(&self) {
        let _ = self.signal_tx.try_send(GuidanceSignal::Resend);
    }

    /// Whether the sequence has finished or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start a guidance sequence for an alert, addressed to the user's own
/// device connection.
pub fn spawn_guidance(
    hub: Arc<ConnectionHub>,
    alert_id: AlertId,
    user_id: UserId,
    config: GuidanceConfig,
    cancel: CancellationToken,
) -> GuidanceHandle {
    let (signal_tx, mut signal_rx) = mpsc::channel(8);
    let task = tokio::spawn(async move {
        let total_steps = config.steps.len() as u32;
        let interval = Duration::from_secs(config.step_interval_secs);
        let audience = Audience::Client(user_id.to_string());
        let mut index = 0usize;
        let mut signals_open = true;

        while index < config.steps.len() {
            hub.broadcast(
                &audience,
                &Envelope::AiAssistant {
                    alert_id,
                    step: index as u32 + 1,
                    total_steps,
                    prompt: config.steps[index].prompt.clone(),
                },
            );
            tokio::select! {
                _ = tokio::time::sleep(interval) => index += 1,
                signal = signal_rx.recv(), if signals_open => match signal {
                    Some(GuidanceSignal::Advance) => index += 1,
                    Some(GuidanceSignal::Resend) => {}
                    None => signals_open = false,
                },
                _ = cancel.cancelled() => {
                    tracing::debug!(alert_id = %alert_id, "Guidance cancelled");
                    return;
                }
            }
        }
        tracing::debug!(alert_id = %alert_id, "Guidance sequence complete");
    });
    GuidanceHandle { signal_tx, task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ClientRole, HubConfig};

    fn setup() -> (Arc<ConnectionHub>, mpsc::Receiver<Envelope>) {
        let hub = Arc::new(ConnectionHub::new(HubConfig::default()));
        let (conn, rx) = hub.connect();
        hub.register(conn, "u1", Some(ClientRole::User));
        (hub, rx)
    }

    fn prompt_of(envelope: Envelope) -> (u32, String) {
        match envelope {
            Envelope::AiAssistant { step, prompt, .. } => (step, prompt),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_steps_auto_advance_on_interval() {
        let (hub, mut rx) = setup();
        let config = GuidanceConfig {
            step_interval_secs: 20,
            ..GuidanceConfig::default()
        };
        let _handle = spawn_guidance(
            hub,
            AlertId::new(),
            UserId::from("u1"),
            config,
            CancellationToken::new(),
        );

        let (step, _) = prompt_of(rx.recv().await.unwrap());
        assert_eq!(step, 1);

        tokio::time::advance(Duration::from_secs(21)).await;
        let (step, _) = prompt_of(rx.recv().await.unwrap());
        assert_eq!(step, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledge_advances_immediately() {
        let (hub, mut rx) = setup();
        let handle = spawn_guidance(
            hub,
            AlertId::new(),
            UserId::from("u1"),
            GuidanceConfig::default(),
            CancellationToken::new(),
        );

        let (step, _) = prompt_of(rx.recv().await.unwrap());
        assert_eq!(step, 1);

        handle.advance();
        let (step, _) = prompt_of(rx.recv().await.unwrap());
        assert_eq!(step, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resend_repeats_current_step() {
        let (hub, mut rx) = setup();
        let handle = spawn_guidance(
            hub,
            AlertId::new(),
            UserId::from("u1"),
            GuidanceConfig::default(),
            CancellationToken::new(),
        );

        let (step, first_prompt) = prompt_of(rx.recv().await.unwrap());
        assert_eq!(step, 1);

        handle.resend();
        let (step, prompt) = prompt_of(rx.recv().await.unwrap());
        assert_eq!(step, 1);
        assert_eq!(prompt, first_prompt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_sequence() {
        let (hub, mut rx) = setup();
        let cancel = CancellationToken::new();
        let handle = spawn_guidance(
            hub,
            AlertId::new(),
            UserId::from("u1"),
            GuidanceConfig::default(),
            cancel.clone(),
        );

        let _ = rx.recv().await.unwrap();
        cancel.cancel();
        tokio::time::advance(Duration::from_secs(60)).await;
        tokio::task::yield_now().await;

        assert!(handle.is_finished());
        assert!(rx.try_recv().is_err());
    }
}
