//! EWMA and decay model shared by neighbor, route, and link-quality updates.
//!
//! spec.md leaves the exact EWMA `α` and staleness half-life as an
//! externalized policy; the defaults here are the resolution recorded in
//! DESIGN.md, not a reproduction of any reference formula.

/// Quality credited for a directly-observed reception (no decay applied).
pub const FULL_QUALITY: u8 = 255;

pub const DEFAULT_EWMA_ALPHA: f64 = 0.2;

/// Per-hop multiplicative falloff applied to digipeaters further down a
/// via-path: the `i`-th repeated digipeater (0-indexed from the first via
/// entry) is credited `FULL_QUALITY * DEFAULT_HOP_DECAY_BASE.powi(i)`.
pub const DEFAULT_HOP_DECAY_BASE: f64 = 0.75;

/// Half-life, in seconds, for time-based quality decay of stale entries.
pub const DEFAULT_DECAY_HALF_LIFE_SECS: i64 = 3600;

/// Blends `previous` toward `sample` by `alpha`, rounding to the nearest u8.
pub fn ewma_update(previous: u8, sample: u8, alpha: f64) -> u8 {
    let blended = (1.0 - alpha) * previous as f64 + alpha * sample as f64;
    blended.round().clamp(0.0, u8::MAX as f64) as u8
}

/// Multiplicative decay factor for the `hop_index`-th repeated digipeater
/// past the first (hop_index 0 = the first via entry, undecayed).
pub fn hop_decay(hop_index: usize, base: f64) -> f64 {
    base.powi(hop_index as i32)
}

/// Applies time-based decay to `quality` given elapsed seconds and a
/// half-life; zero or negative half-life disables decay.
pub fn time_decay(quality: u8, elapsed_secs: i64, half_life_secs: i64) -> u8 {
    if half_life_secs <= 0 || elapsed_secs <= 0 {
        return quality;
    }
    let factor = 0.5f64.powf(elapsed_secs as f64 / half_life_secs as f64);
    (quality as f64 * factor).round().clamp(0.0, u8::MAX as f64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewma_converges_toward_repeated_sample() {
        let mut quality = 0u8;
        for _ in 0..200 {
            quality = ewma_update(quality, FULL_QUALITY, DEFAULT_EWMA_ALPHA);
        }
        assert!(quality >= 253, "expected convergence near 255, got {quality}");
    }

    #[test]
    fn hop_decay_shrinks_with_distance() {
        assert_eq!(hop_decay(0, DEFAULT_HOP_DECAY_BASE), 1.0);
        assert!(hop_decay(1, DEFAULT_HOP_DECAY_BASE) < hop_decay(0, DEFAULT_HOP_DECAY_BASE));
        assert!(hop_decay(2, DEFAULT_HOP_DECAY_BASE) < hop_decay(1, DEFAULT_HOP_DECAY_BASE));
    }

    #[test]
    fn time_decay_halves_at_half_life() {
        let decayed = time_decay(200, DEFAULT_DECAY_HALF_LIFE_SECS, DEFAULT_DECAY_HALF_LIFE_SECS);
        assert_eq!(decayed, 100);
    }

    #[test]
    fn zero_half_life_disables_decay() {
        assert_eq!(time_decay(200, 10_000, 0), 200);
    }
}
