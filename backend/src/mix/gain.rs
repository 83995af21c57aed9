//! Volume level to gain multiplier mapping.

use loopmix_types::MAX_VOLUME;

/// Map a linear `0..=100` slider level to the multiplier fed to `volume`.
///
/// Logarithmic curve `1 - ln(100 - level) / ln(100)`, so equal slider moves
/// sound like roughly equal loudness changes. The endpoints are exact.
pub fn level_to_gain(level: u8) -> f64 {
    if level == 0 {
        return 0.0;
    }
    if level >= MAX_VOLUME {
        return 1.0;
    }

    let max = f64::from(MAX_VOLUME);
    let gain = 1.0 - (max - f64::from(level)).ln() / max.ln();
    gain.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_are_exact() {
        assert_eq!(level_to_gain(0), 0.0);
        assert_eq!(level_to_gain(100), 1.0);
    }

    #[test]
    fn test_above_max_is_unity() {
        assert_eq!(level_to_gain(150), 1.0);
    }

    #[test]
    fn test_midpoint() {
        // 1 - ln(50) / ln(100)
        let gain = level_to_gain(50);
        assert!((gain - 0.150_514_997_8).abs() < 1e-9, "got {}", gain);
    }

    #[test]
    fn test_monotonic_and_bounded() {
        let mut previous = level_to_gain(0);
        for level in 1..=100u8 {
            let gain = level_to_gain(level);
            assert!(gain >= previous, "gain dropped at level {}", level);
            assert!((0.0..=1.0).contains(&gain));
            previous = gain;
        }
    }
}
