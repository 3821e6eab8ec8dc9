//! Reconnect backoff.

use std::time::Duration;

/// Bounded exponential backoff.
///
/// Each failed attempt doubles the delay, starting at `initial` and capped
/// at `max`. Once `max_attempts` delays have been handed out,
/// [`next_delay`](Backoff::next_delay) returns `None` and the caller should
/// give up.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    /// Create a backoff with no failed attempts.
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max,
            max_attempts,
            attempt: 0,
        }
    }

    /// Record a failure and return how long to wait before retrying, or
    /// `None` if the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt = self.attempt.saturating_add(1);
        if self.attempt > self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt - 1).unwrap_or(u32::MAX);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }

    /// Forget past failures, once a connection has carried traffic.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Failures recorded since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the attempt budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.attempt > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_doubles_until_capped() {
        let mut backoff = Backoff::new(ms(5), ms(50), 10);
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay().unwrap()).collect();
        assert_eq!(delays, vec![ms(5), ms(10), ms(20), ms(40), ms(50), ms(50)]);
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let mut backoff = Backoff::new(ms(1), ms(2), 2);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(!backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
        assert!(backoff.is_exhausted());
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_reset() {
        let mut backoff = Backoff::new(ms(5), ms(50), 3);
        backoff.next_delay();
        backoff.next_delay();
        assert_eq!(backoff.attempt(), 2);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Some(ms(5)));
    }

    #[test]
    fn test_zero_budget() {
        let mut backoff = Backoff::new(ms(5), ms(50), 0);
        assert_eq!(backoff.next_delay(), None);
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let mut backoff = Backoff::new(ms(5), Duration::from_secs(1), 100);
        let last = (0..100).filter_map(|_| backoff.next_delay()).last();
        assert_eq!(last, Some(Duration::from_secs(1)));
    }
}
