//! Round-trip time estimation
//!
//! Standard smoothed estimator (gain 1/8 for the mean, 1/4 for the
//! deviation) kept in whole milliseconds to match the protocol clock.

use crate::config::DEFAULT_RTO;

/// RTT (Round-Trip Time) estimator
///
/// Tracks RTT measurements and derives the retransmission timeout.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT (ms)
    srtt: u32,
    /// RTT variance (ms)
    rtt_var: u32,
    /// Current retransmission timeout (ms)
    rto: u32,
    min_rto: u32,
    max_rto: u32,
    /// Number of samples
    sample_count: u32,
}

impl RttEstimator {
    /// Create a new RTT estimator with RTO bounds in milliseconds
    pub fn new(min_rto: u32, max_rto: u32) -> Self {
        RttEstimator {
            srtt: 0,
            rtt_var: 0,
            rto: DEFAULT_RTO.clamp(min_rto, max_rto),
            min_rto,
            max_rto,
            sample_count: 0,
        }
    }

    /// Update with a new RTT sample
    pub fn update(&mut self, rtt_ms: u32) {
        if self.sample_count == 0 {
            self.srtt = rtt_ms;
            self.rtt_var = rtt_ms / 2;
        } else {
            let delta = rtt_ms.abs_diff(self.srtt);
            self.rtt_var = ((3 * self.rtt_var as u64 + delta as u64) / 4) as u32;
            self.srtt = ((7 * self.srtt as u64 + rtt_ms as u64) / 8) as u32;
            if self.srtt < 1 {
                self.srtt = 1;
            }
        }
        self.sample_count = self.sample_count.saturating_add(1);

        let rto = self.srtt as u64 + 4 * self.rtt_var as u64;
        self.rto = rto.clamp(self.min_rto as u64, self.max_rto as u64) as u32;
    }

    /// Get smoothed RTT in milliseconds
    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    /// Get RTT variance in milliseconds
    pub fn rtt_var(&self) -> u32 {
        self.rtt_var
    }

    /// Get retransmission timeout (RTO) in milliseconds
    ///
    /// RTO = SRTT + 4 * RTT_VAR, clamped to the configured bounds
    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn max_rto(&self) -> u32 {
        self.max_rto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_rto() {
        let estimator = RttEstimator::new(100, 60_000);
        assert_eq!(estimator.rto(), 200);

        let estimator = RttEstimator::new(300, 60_000);
        assert_eq!(estimator.rto(), 300);
    }

    #[test]
    fn test_first_sample() {
        let mut estimator = RttEstimator::new(10, 60_000);
        estimator.update(100);

        assert_eq!(estimator.srtt(), 100);
        assert_eq!(estimator.rtt_var(), 50);
        assert_eq!(estimator.rto(), 300);
    }

    #[test]
    fn test_smoothing() {
        let mut estimator = RttEstimator::new(10, 60_000);
        estimator.update(100);
        estimator.update(180);

        // rttvar = (3*50 + 80) / 4, srtt = (7*100 + 180) / 8
        assert_eq!(estimator.rtt_var(), 57);
        assert_eq!(estimator.srtt(), 110);
        assert_eq!(estimator.rto(), 110 + 4 * 57);
    }

    #[test]
    fn test_rto_clamped() {
        let mut estimator = RttEstimator::new(100, 500);
        estimator.update(1);
        assert_eq!(estimator.rto(), 100);

        estimator.update(10_000);
        assert_eq!(estimator.rto(), 500);
    }

    #[test]
    fn test_srtt_floor() {
        let mut estimator = RttEstimator::new(10, 60_000);
        estimator.update(0);
        estimator.update(0);
        assert_eq!(estimator.srtt(), 1);
    }
}
