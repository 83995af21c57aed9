//! Normalising backend progress samples into [`MixingProgress`].

use loopmix_types::MixingProgress;
use tracing::debug;

/// Raw progress sample as a backend observes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineProgress {
    /// Elapsed output time only; the total is unknown (native statistics stream)
    Elapsed { elapsed_ms: u64 },
    /// Engine-computed completion ratio plus elapsed time (embedded engine)
    Ratio { ratio: f64, elapsed_ms: u64 },
}

/// Turns raw samples into [`MixingProgress`] for one session.
///
/// For elapsed-only samples the total duration is not known upfront. The
/// first nonzero sample is doubled to seed an estimate, and whenever the
/// elapsed time catches up with the estimate it is doubled again. This is a
/// coarse approximation with no accuracy bound: each revision makes `ratio`
/// drop back.
#[derive(Debug, Default)]
pub struct ProgressEstimator {
    estimated_total_ms: u64,
    last_elapsed_ms: u64,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sample: EngineProgress) -> MixingProgress {
        match sample {
            EngineProgress::Elapsed { elapsed_ms } => {
                if elapsed_ms > 0 && elapsed_ms >= self.estimated_total_ms {
                    let revised = elapsed_ms.saturating_mul(2);
                    if self.estimated_total_ms > 0 {
                        debug!(
                            "Revising duration estimate {} ms -> {} ms",
                            self.estimated_total_ms, revised
                        );
                    }
                    self.estimated_total_ms = revised;
                }
                self.last_elapsed_ms = elapsed_ms;

                let ratio = if self.estimated_total_ms > 0 {
                    elapsed_ms as f64 / self.estimated_total_ms as f64
                } else {
                    0.0
                };
                MixingProgress::new(ratio, elapsed_ms, self.estimated_total_ms)
            }
            EngineProgress::Ratio { ratio, elapsed_ms } => {
                self.last_elapsed_ms = elapsed_ms;
                self.estimated_total_ms = if ratio > 0.0 && ratio.is_finite() {
                    (elapsed_ms as f64 / ratio).round() as u64
                } else {
                    0
                };
                MixingProgress::new(ratio, elapsed_ms, self.estimated_total_ms)
            }
        }
    }

    /// Elapsed time of the latest sample.
    pub fn last_elapsed_ms(&self) -> u64 {
        self.last_elapsed_ms
    }
}
