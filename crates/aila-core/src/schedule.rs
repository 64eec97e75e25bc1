//! When to run the next refresh cycle.

use std::time::{Duration, Instant};

use crate::config::ScheduleConfig;

/// Polling interval and minimum gap between two cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    /// How often to check whether a cycle is due.
    pub poll_interval: Duration,
    /// Minimum time between the start of two cycles.
    pub min_gap: Duration,
}

impl RefreshSchedule {
    /// Build the schedule from configuration.
    #[must_use]
    pub const fn from_config(config: &ScheduleConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(if config.poll_secs == 0 { 1 } else { config.poll_secs }),
            min_gap: Duration::from_secs(config.interval_hours.saturating_mul(3600)),
        }
    }

    /// Whether a cycle is due, given when the last one started.
    ///
    /// A schedule that never ran is always due.
    #[must_use]
    pub fn is_due(&self, last_run: Option<Instant>) -> bool {
        self.is_due_at(last_run, Instant::now())
    }

    /// [`Self::is_due`] against an explicit clock reading.
    #[must_use]
    pub fn is_due_at(&self, last_run: Option<Instant>, now: Instant) -> bool {
        last_run.is_none_or(|last| now.saturating_duration_since(last) >= self.min_gap)
    }

    /// Time left until the next cycle is due.
    #[must_use]
    pub fn remaining(&self, last_run: Option<Instant>, now: Instant) -> Duration {
        last_run.map_or(Duration::ZERO, |last| {
            self.min_gap.saturating_sub(now.saturating_duration_since(last))
        })
    }
}

impl Default for RefreshSchedule {
    fn default() -> Self {
        Self::from_config(&ScheduleConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_poll_every_minute_and_run_daily() {
        let schedule = RefreshSchedule::default();
        assert_eq!(schedule.poll_interval, Duration::from_secs(60));
        assert_eq!(schedule.min_gap, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn first_run_is_always_due() {
        assert!(RefreshSchedule::default().is_due(None));
    }

    #[test]
    fn due_only_after_the_gap() {
        let schedule = RefreshSchedule {
            poll_interval: Duration::from_secs(1),
            min_gap: Duration::from_secs(3600),
        };
        let start = Instant::now();

        assert!(!schedule.is_due_at(Some(start), start + Duration::from_secs(60)));
        assert!(schedule.is_due_at(Some(start), start + Duration::from_secs(3600)));
        assert_eq!(
            schedule.remaining(Some(start), start + Duration::from_secs(600)),
            Duration::from_secs(3000)
        );
    }

    #[test]
    fn zero_poll_is_clamped() {
        let schedule = RefreshSchedule::from_config(&ScheduleConfig {
            poll_secs: 0,
            interval_hours: 1,
        });
        assert_eq!(schedule.poll_interval, Duration::from_secs(1));
    }
}
