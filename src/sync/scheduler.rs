//! When should a push run?

use chrono::{DateTime, Duration, Utc};

/// Thresholds for the push decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushPolicy {
    /// Push as soon as more than this many entries are pending.
    pub threshold: usize,
    /// Push any pending entries once the last success is older than this.
    pub max_interval: Duration,
}

impl Default for PushPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            max_interval: Duration::hours(6),
        }
    }
}

impl PushPolicy {
    pub fn new(threshold: usize, interval_hours: i64) -> Self {
        Self {
            threshold,
            max_interval: Duration::hours(interval_hours),
        }
    }

    /// Pure decision: no I/O, no clock reads.
    ///
    /// A push that has never succeeded counts as overdue.
    pub fn should_push(
        &self,
        force: bool,
        pending: usize,
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if force || pending > self.threshold {
            return true;
        }
        if pending == 0 {
            return false;
        }
        match last_success {
            Some(finished_at) => now - finished_at > self.max_interval,
            None => true,
        }
    }
}

/// [`PushPolicy::should_push`] with the default thresholds.
pub fn should_push(
    force: bool,
    pending: usize,
    last_success: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    PushPolicy::default().should_push(force, pending, last_success, now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_more_than_threshold_pushes_regardless_of_time() {
        let now = Utc::now();
        assert!(should_push(false, 6, Some(now), now));
        assert!(should_push(false, 6, Some(now - Duration::minutes(1)), now));
        assert!(!should_push(false, 5, Some(now), now));
    }

    #[test]
    fn test_recent_success_with_few_pending_waits() {
        let now = Utc::now();
        assert!(!should_push(false, 1, Some(now - Duration::hours(1)), now));
    }

    #[test]
    fn test_stale_success_with_pending_pushes() {
        let now = Utc::now();
        assert!(should_push(false, 1, Some(now - Duration::hours(7)), now));
        assert!(!should_push(false, 0, Some(now - Duration::hours(7)), now));
    }

    #[test]
    fn test_force_always_pushes() {
        let now = Utc::now();
        assert!(should_push(true, 0, Some(now), now));
    }

    #[test]
    fn test_never_pushed() {
        let now = Utc::now();
        assert!(should_push(false, 1, None, now));
        assert!(!should_push(false, 0, None, now));
    }

    #[test]
    fn test_custom_policy() {
        let now = Utc::now();
        let policy = PushPolicy::new(20, 1);
        assert!(!policy.should_push(false, 10, Some(now - Duration::minutes(30)), now));
        assert!(policy.should_push(false, 10, Some(now - Duration::minutes(90)), now));
    }
}
