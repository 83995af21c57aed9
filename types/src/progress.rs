//! Cross-backend mixing progress.

use serde::{Deserialize, Serialize};

/// Progress of a running mix session.
///
/// `ratio` is best-effort. Backends that have to estimate the total duration
/// may revise the estimate upward mid-session, which can transiently make
/// `ratio` go down. Consumers should not treat it as strictly monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct MixingProgress {
    /// Completion ratio in `[0, 1]`
    pub ratio: f64,
    /// Elapsed output time in milliseconds
    pub elapsed_ms: u64,
    /// Estimated total output duration in milliseconds (0 when unknown)
    pub estimated_total_ms: u64,
}

impl MixingProgress {
    /// Build a progress sample, clamping `ratio` into `[0, 1]`.
    pub fn new(ratio: f64, elapsed_ms: u64, estimated_total_ms: u64) -> Self {
        let ratio = if ratio.is_finite() {
            ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            ratio,
            elapsed_ms,
            estimated_total_ms,
        }
    }

    /// Final sample emitted when a session completes.
    pub fn finished(elapsed_ms: u64) -> Self {
        Self::new(1.0, elapsed_ms, elapsed_ms)
    }

    /// Ratio as a whole percentage, for display.
    pub fn percent(&self) -> u8 {
        (self.ratio * 100.0).round() as u8
    }
}
