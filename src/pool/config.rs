//! Pool configuration.

use std::time::Duration;

use crate::core::{DEFAULT_CHECK_INTERVAL, DEFAULT_DIAL_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_MAX_IDLE};

/// Per-destination connection pool configuration.
///
/// Every [`ConnectionPool`](super::ConnectionPool) created by a
/// [`Pool`](super::Pool) gets a copy of this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle connections the health loop keeps topped up.
    pub min_idle: usize,

    /// Maximum idle connections retained; extra returns evict the oldest.
    pub max_idle: usize,

    /// Maximum connections (idle plus checked out); zero means unbounded.
    pub max_active: usize,

    /// Block in `get` when `max_active` is reached instead of failing.
    pub wait: bool,

    /// Idle connections older than this are evicted; zero disables.
    pub idle_timeout: Duration,

    /// Connections older than this are evicted; zero disables.
    pub max_conn_lifetime: Duration,

    /// Dial timeout when the caller does not supply one.
    pub dial_timeout: Duration,

    /// Close every released connection instead of pooling it.
    pub force_close: bool,

    /// Interval of the background health loop.
    pub check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 0,
            max_idle: DEFAULT_MAX_IDLE,
            max_active: 0,
            wait: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_conn_lifetime: Duration::ZERO,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            force_close: false,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

/// Builder for [`PoolConfig`].
#[derive(Debug)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Set the number of idle connections kept warm.
    pub fn min_idle(mut self, n: usize) -> Self {
        self.config.min_idle = n;
        self
    }

    /// Set the idle list capacity.
    pub fn max_idle(mut self, n: usize) -> Self {
        self.config.max_idle = n;
        self
    }

    /// Set the connection limit (zero for unbounded).
    pub fn max_active(mut self, n: usize) -> Self {
        self.config.max_active = n;
        self
    }

    /// Block at the connection limit instead of failing.
    pub fn wait(mut self, wait: bool) -> Self {
        self.config.wait = wait;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    pub fn max_conn_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_conn_lifetime = lifetime;
        self
    }

    /// Set the default dial timeout.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    /// Close connections on release instead of pooling them.
    pub fn force_close(mut self, force: bool) -> Self {
        self.config.force_close = force;
        self
    }

    /// Set the health loop interval.
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_idle, DEFAULT_MAX_IDLE);
        assert_eq!(config.idle_timeout, Duration::from_secs(50));
        assert_eq!(config.dial_timeout, Duration::from_millis(200));
        assert_eq!(config.max_active, 0);
        assert!(!config.wait);
    }

    #[test]
    fn test_builder() {
        let config = PoolConfigBuilder::new()
            .min_idle(2)
            .max_idle(8)
            .max_active(16)
            .wait(true)
            .force_close(true)
            .build();
        assert_eq!(config.min_idle, 2);
        assert_eq!(config.max_idle, 8);
        assert_eq!(config.max_active, 16);
        assert!(config.wait);
        assert!(config.force_close);
    }
}
