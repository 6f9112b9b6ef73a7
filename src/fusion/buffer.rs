//! Per-user signal buffer holding the most recent sample per modality.

use chrono::{DateTime, Duration, Utc};

use crate::domain::{DetectionSignal, Modality};

/// Sliding-window buffer for one user's signals.
///
/// Owned exclusively by the fusion engine and mutated only during
/// evaluation. Holds at most one signal per modality; older samples for
/// the same modality are replaced on insert.
#[derive(Debug, Default)]
pub struct FusionBuffer {
    video: Option<DetectionSignal>,
    audio: Option<DetectionSignal>,
}

impl FusionBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a signal, replacing any older sample for the same modality.
    ///
    /// A sample older than the one already buffered is ignored; signals
    /// may arrive out of order from independent extractors.
    pub fn insert(&mut self, signal: DetectionSignal) {
        let slot = match signal.modality {
            Modality::Video => &mut self.video,
            Modality::Audio => &mut self.audio,
        };
        match slot {
            Some(existing) if existing.timestamp > signal.timestamp => {}
            _ => *slot = Some(signal),
        }
    }

    /// Get the buffered signal for a modality if it is still inside the
    /// window ending at `now`.
    pub fn fresh(&self, modality: Modality, now: DateTime<Utc>, window: Duration) -> Option<&DetectionSignal> {
        let slot = match modality {
            Modality::Video => self.video.as_ref(),
            Modality::Audio => self.audio.as_ref(),
        };
        slot.filter(|s| now.signed_duration_since(s.timestamp) <= window)
    }

    /// Drop buffered samples that fell out of the window ending at `now`.
    pub fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        for slot in [&mut self.video, &mut self.audio] {
            if let Some(s) = slot {
                if now.signed_duration_since(s.timestamp) > window {
                    *slot = None;
                }
            }
        }
    }

    /// Whether the buffer holds no samples at all.
    pub fn is_empty(&self) -> bool {
        self.video.is_none() && self.audio.is_none()
    }
}
