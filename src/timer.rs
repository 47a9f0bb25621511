//! Monotonic clock and adaptive retransmission-timeout estimation.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`Clock`] — a monotonic nanosecond time source anchored at connection
//!   start; packet timestamps and trace lines are relative to its origin.
//! - [`RttEstimator`] — smoothed round-trip estimate and deviation, from
//!   which the retransmission timeout (RTO) is derived.
//!
//! The estimator follows the classic smoothed-RTT recurrence:
//!
//! ```text
//! first sample:  est = s             dev = 0                  rto = 2·est
//! afterwards:    dev = ¾·dev + ¼·|s − est|
//!                est = ⅞·est + ⅛·s
//!                rto = est + 4·dev
//! ```
//!
//! Before the first sample the RTO is a conservative 5 seconds.  Samples come
//! only from new (non-duplicate) ACKs, as `now − echoed_timestamp`; the
//! caller suppresses samples for sequences that were ever retransmitted.

use std::time::{Duration, Instant};

/// RTO before any RTT sample has been observed.
pub const INITIAL_RTO: Duration = Duration::from_secs(5);

/// Lower bound on the derived RTO.  Loopback RTTs are far below the timer
/// granularity; without a floor they would derive RTOs that fire before the
/// ACK can possibly be processed.
pub const MIN_RTO: Duration = Duration::from_millis(100);

/// Monotonic time source anchored when the connection begins.
///
/// All packet timestamps and trace lines are nanoseconds (or seconds) since
/// this origin.  Only the anchoring endpoint ever interprets its own
/// timestamps — the peer echoes them verbatim.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Capture the origin.  Call once, when the connection begins.
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Monotonic nanoseconds since the origin.
    pub fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    /// Seconds since the origin, for the packet-event trace.
    pub fn elapsed_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// Elapsed time between an echoed timestamp and now.
    ///
    /// Returns zero if the echo is somehow ahead of the local clock; the
    /// subtraction must not panic on a hostile echo.
    pub fn since(&self, echoed_nanos: u64) -> Duration {
        Duration::from_nanos(self.now_nanos().saturating_sub(echoed_nanos))
    }
}

/// Smoothed RTT, deviation, and derived retransmission timeout.
#[derive(Debug)]
pub struct RttEstimator {
    est: Option<Duration>,
    dev: Duration,
    rto: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            est: None,
            dev: Duration::ZERO,
            rto: INITIAL_RTO,
        }
    }

    /// Fold in one RTT sample and return the updated RTO.
    pub fn observe(&mut self, sample: Duration) -> Duration {
        match self.est {
            None => {
                self.est = Some(sample);
                self.dev = Duration::ZERO;
                self.rto = sample * 2;
            }
            Some(est) => {
                let diff = sample.abs_diff(est);
                self.dev = self.dev * 3 / 4 + diff / 4;
                let est = est * 7 / 8 + sample / 8;
                self.est = Some(est);
                self.rto = est + self.dev * 4;
            }
        }
        self.rto = self.rto.max(MIN_RTO);
        self.rto
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Smoothed estimate, `None` before the first sample.
    pub fn estimate(&self) -> Option<Duration> {
        self.est
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_rto_is_five_seconds() {
        assert_eq!(RttEstimator::new().rto(), Duration::from_secs(5));
    }

    #[test]
    fn first_sample_doubles() {
        let mut e = RttEstimator::new();
        let rto = e.observe(Duration::from_millis(80));
        assert_eq!(e.estimate(), Some(Duration::from_millis(80)));
        assert_eq!(rto, Duration::from_millis(160));
    }

    #[test]
    fn steady_samples_converge_to_sample_value() {
        let mut e = RttEstimator::new();
        for _ in 0..64 {
            e.observe(Duration::from_millis(150));
        }
        let est = e.estimate().unwrap();
        assert_eq!(est, Duration::from_millis(150));
        // With zero deviation the RTO collapses onto the estimate.
        assert_eq!(e.rto(), Duration::from_millis(150));
    }

    #[test]
    fn second_sample_follows_recurrence() {
        let mut e = RttEstimator::new();
        e.observe(Duration::from_millis(80));
        let rto = e.observe(Duration::from_millis(40));
        // dev = |40 − 80| / 4 = 10ms; est = 80·7/8 + 40/8 = 75ms.
        assert_eq!(e.estimate(), Some(Duration::from_millis(75)));
        assert_eq!(rto, Duration::from_millis(75 + 40));
    }

    #[test]
    fn rto_bounded_below_by_estimate() {
        let mut e = RttEstimator::new();
        let samples = [120u64, 30, 250, 45, 90, 300, 60];
        for ms in samples {
            e.observe(Duration::from_millis(ms));
            let est = e.estimate().unwrap();
            assert!(e.rto() >= est, "rto {:?} below estimate {:?}", e.rto(), est);
        }
    }

    #[test]
    fn tiny_samples_hit_the_floor() {
        let mut e = RttEstimator::new();
        let rto = e.observe(Duration::from_micros(200));
        assert_eq!(rto, MIN_RTO);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = Clock::start();
        let a = clock.now_nanos();
        let b = clock.now_nanos();
        assert!(b >= a);
        assert_eq!(clock.since(u64::MAX), Duration::ZERO);
    }
}
