//! T1 retransmission-timeout estimator, the AX.25 analogue of RFC 6298's
//! SRTT/RTTVAR smoothing used for TCP's RTO. Bounded to `[T1_MIN, T1_MAX]`
//! per spec: "T1 is smoothed RTT x beta, bounded [T1_min, T1_max]".

use std::time::Duration;

pub const T1_MIN: Duration = Duration::from_millis(500);
pub const T1_MAX: Duration = Duration::from_secs(10);
pub const T1_INITIAL: Duration = Duration::from_secs(4);
const ALPHA: f32 = 0.125;
const BETA: f32 = 0.25;
const K: u32 = 4;
const MAX_BACKOFF_EXPONENT: u32 = 4;

#[derive(Debug, Clone, Copy)]
pub struct RttEstimator {
    srtt: Duration,
    rttvar: Duration,
    t1: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            srtt: T1_INITIAL,
            rttvar: T1_INITIAL / 2,
            t1: T1_INITIAL,
        }
    }

    /// Records a round-trip sample (frame sent to ack/response received).
    pub fn update(&mut self, sample: Duration) {
        let diff = sample.abs_diff(self.srtt);
        self.rttvar = self.rttvar.mul_f32(1.0 - BETA) + diff.mul_f32(BETA);
        self.srtt = self.srtt.mul_f32(1.0 - ALPHA) + sample.mul_f32(ALPHA);
        self.t1 = (self.srtt + self.rttvar * K).clamp(T1_MIN, T1_MAX);
    }

    pub fn t1(&self) -> Duration {
        self.t1
    }

    /// T1 with exponential backoff applied for the `retries`-th retransmit.
    pub fn t1_with_backoff(&self, retries: u32) -> Duration {
        (self.t1 * (1 << retries.min(MAX_BACKOFF_EXPONENT))).min(T1_MAX * 8)
    }

    pub fn srtt(&self) -> Duration {
        self.srtt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converges_toward_sample() {
        let mut rtt = RttEstimator::new();
        for _ in 0..50 {
            rtt.update(Duration::from_millis(800));
        }
        assert!(rtt.srtt().as_millis().abs_diff(800) < 10);
    }

    #[test]
    fn t1_is_bounded() {
        let mut rtt = RttEstimator::new();
        rtt.update(Duration::from_millis(1));
        assert!(rtt.t1() >= T1_MIN);
        rtt.update(Duration::from_secs(60));
        assert!(rtt.t1() <= T1_MAX);
    }
}
