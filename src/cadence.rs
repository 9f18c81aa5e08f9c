use crate::{protocol::CRANK_TIME_TICKS_PER_SECOND, types::CrankEvent};
use tracing::trace;

/// Modulus of the 16-bit crank event timestamp
const EVENT_TIME_MODULUS: i32 = 1 << 16;

/// Derives crank cadence from successive crank events
///
/// Starts [`Uninitialized`](Self::Uninitialized). The first observed event
/// becomes the baseline and every later event replaces it, whether or not
/// a cadence value could be produced. Events must be fed in arrival order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CadenceTracker {
    /// No crank event seen yet
    #[default]
    Uninitialized,
    /// Holds the most recent crank event
    Tracking(CrankEvent),
}

impl CadenceTracker {
    /// Create an empty tracker
    #[must_use]
    pub const fn new() -> Self {
        Self::Uninitialized
    }

    /// Most recently observed crank event
    #[must_use]
    pub const fn baseline(&self) -> Option<CrankEvent> {
        match self {
            Self::Uninitialized => None,
            Self::Tracking(event) => Some(*event),
        }
    }

    /// Feed a crank event and return cadence in RPM when it can be derived
    ///
    /// Returns `None` on the first event, and when the elapsed time is not
    /// positive after correcting for a single timestamp rollover.
    ///
    /// The revolution counter is not corrected for rollover: if it wraps
    /// between two events the result is negative.
    pub fn observe(&mut self, event: CrankEvent) -> Option<f64> {
        let previous = std::mem::replace(self, Self::Tracking(event));

        let Self::Tracking(previous) = previous else {
            trace!(
                revolutions = event.revolutions,
                event_time = event.event_time,
                "Crank baseline established"
            );
            return None;
        };

        let rev_diff = i32::from(event.revolutions) - i32::from(previous.revolutions);
        let mut time_diff = i32::from(event.event_time) - i32::from(previous.event_time);
        if time_diff < 0 {
            time_diff += EVENT_TIME_MODULUS;
        }

        if time_diff <= 0 {
            trace!(rev_diff, "No elapsed crank time, cadence unavailable");
            return None;
        }

        let rpm = f64::from(rev_diff) * 60.0 * f64::from(CRANK_TIME_TICKS_PER_SECOND)
            / f64::from(time_diff);
        Some(rpm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rpm(actual: Option<f64>, expected: f64) {
        let actual = actual.expect("expected a cadence value");
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected} RPM, got {actual}"
        );
    }

    #[test]
    fn test_first_observation_sets_baseline() {
        let mut tracker = CadenceTracker::new();
        assert!(tracker.baseline().is_none());

        assert!(tracker.observe(CrankEvent::new(10, 32768)).is_none());
        assert_eq!(tracker.baseline(), Some(CrankEvent::new(10, 32768)));
    }

    #[test]
    fn test_steady_cadence() {
        let mut tracker = CadenceTracker::new();
        tracker.observe(CrankEvent::new(10, 0x8000));

        assert_rpm(tracker.observe(CrankEvent::new(20, 0x9000)), 150.0);
        // One revolution per second
        assert_rpm(tracker.observe(CrankEvent::new(21, 0x9400)), 60.0);
    }

    #[test]
    fn test_timestamp_rollover() {
        let mut tracker = CadenceTracker::new();
        tracker.observe(CrankEvent::new(60000, 65000));

        let expected = 10.0 * 60.0 * 1024.0 / 1036.0;
        assert_rpm(tracker.observe(CrankEvent::new(60010, 500)), expected);
        assert!((expected - 593.05).abs() < 0.01);
    }

    #[test]
    fn test_zero_elapsed_time_still_advances_baseline() {
        let mut tracker = CadenceTracker::new();
        tracker.observe(CrankEvent::new(10, 1000));

        assert!(tracker.observe(CrankEvent::new(12, 1000)).is_none());
        assert_eq!(tracker.baseline(), Some(CrankEvent::new(12, 1000)));

        // Measured against the advanced baseline, not the first event
        assert_rpm(tracker.observe(CrankEvent::new(13, 2024)), 60.0);
    }

    #[test]
    fn test_no_revolutions_yields_zero_rpm() {
        let mut tracker = CadenceTracker::new();
        tracker.observe(CrankEvent::new(500, 4000));
        assert_rpm(tracker.observe(CrankEvent::new(500, 6048)), 0.0);
    }

    #[test]
    fn test_revolution_rollover_is_not_corrected() {
        // Known limitation: only the timestamp is rollover-corrected
        let mut tracker = CadenceTracker::new();
        tracker.observe(CrankEvent::new(65530, 1000));

        let rpm = tracker.observe(CrankEvent::new(4, 2024)).unwrap();
        assert!(rpm < 0.0);
        assert_rpm(Some(rpm), -65526.0 * 60.0);
    }

    #[test]
    fn test_tracker_is_never_reset() {
        let mut tracker = CadenceTracker::default();
        tracker.observe(CrankEvent::new(1, 100));
        for i in 2..10u16 {
            assert!(tracker.observe(CrankEvent::new(i, 100 + (i - 1) * 1024)).is_some());
        }
        assert!(matches!(tracker, CadenceTracker::Tracking(_)));
    }
}
