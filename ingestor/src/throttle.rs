use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_INSERT_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_URGENT_THRESHOLD: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The sampling interval has elapsed.
    Scheduled,
    /// Moisture is at or below the urgency threshold; the interval is bypassed.
    Urgent,
    Skipped,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Skipped)
    }
}

/// Bounds the write rate: at most one routine reading per interval, but
/// dangerously dry readings always go through.
#[derive(Debug)]
pub struct AdmissionPolicy {
    interval: Duration,
    urgent_threshold: i32,
    last_persisted_at: Option<Instant>,
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INSERT_INTERVAL, DEFAULT_URGENT_THRESHOLD)
    }
}

impl AdmissionPolicy {
    pub fn new(interval: Duration, urgent_threshold: i32) -> Self {
        Self {
            interval,
            urgent_threshold,
            last_persisted_at: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_persisted_at(&self) -> Option<Instant> {
        self.last_persisted_at
    }

    /// Decides whether a reading taken at `now` should be stored.
    ///
    /// `persen` is the value as received, before rounding, so 40.4 is not
    /// urgent against a threshold of 40. An admission moves the window
    /// forward even if the insert later fails.
    pub fn admit(&mut self, now: Instant, persen: f64) -> Admission {
        let decision = if persen <= f64::from(self.urgent_threshold) {
            Admission::Urgent
        } else {
            match self.last_persisted_at {
                // nothing stored yet
                None => Admission::Scheduled,
                Some(last) if now.saturating_duration_since(last) >= self.interval => {
                    Admission::Scheduled
                }
                Some(_) => Admission::Skipped,
            }
        };

        if decision.is_admitted() {
            self.last_persisted_at = Some(now);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cold_start_then_skip_within_interval() {
        let mut policy = AdmissionPolicy::default();
        let t0 = Instant::now();

        assert_eq!(policy.admit(t0, 70.0), Admission::Scheduled);
        assert_eq!(
            policy.admit(t0 + Duration::from_secs(5), 70.0),
            Admission::Skipped
        );
        assert_eq!(policy.last_persisted_at(), Some(t0));
    }

    #[test]
    fn test_admits_once_interval_elapsed() {
        let mut policy = AdmissionPolicy::default();
        let t0 = Instant::now();

        policy.admit(t0, 70.0);
        assert_eq!(
            policy.admit(t0 + Duration::from_secs(14), 70.0),
            Admission::Skipped
        );
        assert_eq!(
            policy.admit(t0 + Duration::from_secs(15), 70.0),
            Admission::Scheduled
        );
        assert_eq!(
            policy.last_persisted_at(),
            Some(t0 + Duration::from_secs(15))
        );
    }

    #[test]
    fn test_urgent_reading_bypasses_interval() {
        let mut policy = AdmissionPolicy::default();
        let t0 = Instant::now();

        policy.admit(t0, 70.0);
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(policy.admit(t1, 35.0), Admission::Urgent);
        assert_eq!(policy.last_persisted_at(), Some(t1));

        // threshold is inclusive
        assert_eq!(policy.admit(t1, 40.0), Admission::Urgent);
        assert_eq!(policy.admit(t1, 41.0), Admission::Skipped);
    }

    #[test]
    fn test_fraction_above_threshold_is_not_urgent() {
        let mut policy = AdmissionPolicy::default();
        let t0 = Instant::now();

        policy.admit(t0, 70.0);
        let t1 = t0 + Duration::from_secs(1);
        assert_eq!(policy.admit(t1, 40.4), Admission::Skipped);
        assert_eq!(policy.last_persisted_at(), Some(t0));
        assert_eq!(policy.admit(t1, 39.9), Admission::Urgent);
    }

    #[test]
    fn test_urgent_admission_restarts_window() {
        let mut policy = AdmissionPolicy::default();
        let t0 = Instant::now();

        policy.admit(t0, 70.0);
        policy.admit(t0 + Duration::from_secs(10), 20.0);
        // 15s after the first reading but only 5s after the urgent one
        assert_eq!(
            policy.admit(t0 + Duration::from_secs(15), 70.0),
            Admission::Skipped
        );
    }

    #[test]
    fn test_custom_interval_and_threshold() {
        let mut policy = AdmissionPolicy::new(Duration::from_secs(60), 10);
        let t0 = Instant::now();

        policy.admit(t0, 50.0);
        assert_eq!(
            policy.admit(t0 + Duration::from_secs(30), 20.0),
            Admission::Skipped
        );
        assert_eq!(
            policy.admit(t0 + Duration::from_secs(30), 10.0),
            Admission::Urgent
        );
    }
}
