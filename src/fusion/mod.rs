//! Time-windowed multi-sensor fusion.
//!
//! Per-modality confidence signals are buffered per user and combined
//! into a graded [`FusedDecision`](crate::domain::FusedDecision):
//!
//! - both modalities fresh: weighted sum of the confidences
//! - single modality: that confidence, gated by a stricter confirm
//!   threshold to compensate for weaker evidence
//!
//! The engine performs no I/O; it only mutates its buffers and emits
//! decisions. Duplicate-alert storms from continuous per-frame signals
//! are prevented by a debounce: confirmed decisions are suppressed while
//! the user has an open alert and for a cooldown after it closes.

mod buffer;
mod engine;

pub use buffer::FusionBuffer;
pub use engine::{
    DetectionFusionEngine, FusionConfig, FusionConfigBuilder, FusionOutcome, SuspectedPolicy,
};
