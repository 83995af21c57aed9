//! Speed factor decomposition into `atempo` steps.
//!
//! The tempo primitive only accepts factors in `[0.5, 2.0]`, so anything
//! outside that range is reached by chaining full-range steps.

use tracing::warn;

/// Smallest factor a single tempo step accepts.
pub const MIN_TEMPO_STEP: f64 = 0.5;
/// Largest factor a single tempo step accepts.
pub const MAX_TEMPO_STEP: f64 = 2.0;
/// Remaining factors this close to 1.0 are dropped.
pub const TEMPO_TOLERANCE: f64 = 0.01;

/// Decompose `speed` into an ordered list of tempo factors.
///
/// Returns an empty list for `1.0`. Every returned factor lies in
/// `[MIN_TEMPO_STEP, MAX_TEMPO_STEP]`; the last one is rounded to two
/// decimal places. `speed` must be positive and finite; anything else
/// resolves to the identity.
pub fn resolve(speed: f64) -> Vec<f64> {
    let mut steps = Vec::new();

    if speed == 1.0 {
        return steps;
    }
    if !speed.is_finite() || speed <= 0.0 {
        warn!("Cannot resolve tempo chain for speed {}, using identity", speed);
        return steps;
    }

    let mut remaining = speed;
    while (remaining - 1.0).abs() > TEMPO_TOLERANCE {
        if remaining > MAX_TEMPO_STEP {
            steps.push(MAX_TEMPO_STEP);
            remaining /= MAX_TEMPO_STEP;
        } else if remaining < MIN_TEMPO_STEP {
            steps.push(MIN_TEMPO_STEP);
            remaining /= MIN_TEMPO_STEP;
        } else {
            steps.push(round_to_hundredths(remaining));
            break;
        }
    }

    steps
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
