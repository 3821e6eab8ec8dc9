//! Multiplexer configuration.

use std::time::Duration;

use crate::core::{
    DEFAULT_CONNECT_NUMBER, DEFAULT_MUX_DIAL_TIMEOUT, DEFAULT_QUEUE_SIZE, DEFAULT_READ_BUFFER_SIZE,
    INITIAL_BACKOFF, MAX_BACKOFF, MAX_RECONNECT_ATTEMPTS,
};

/// Multiplexer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexedConfig {
    /// Physical connections opened per destination.
    pub connect_number: usize,

    /// Capacity of each connection's outbound frame queue.
    pub queue_size: usize,

    /// Fail writes on a full queue instead of waiting.
    pub drop_full: bool,

    /// Dial timeout for physical connections; zero means no timeout.
    pub dial_timeout: Duration,

    /// Initial capacity of the stream read buffer.
    pub read_buffer_size: usize,

    /// Delay after the first failed reconnect.
    pub initial_backoff: Duration,

    /// Upper bound of the reconnect delay.
    pub max_backoff: Duration,

    /// Failed reconnects tolerated before the destination is dropped.
    pub max_reconnect_attempts: u32,
}

impl Default for MultiplexedConfig {
    fn default() -> Self {
        Self {
            connect_number: DEFAULT_CONNECT_NUMBER,
            queue_size: DEFAULT_QUEUE_SIZE,
            drop_full: false,
            dial_timeout: DEFAULT_MUX_DIAL_TIMEOUT,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
            max_reconnect_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Builder for [`MultiplexedConfig`].
#[derive(Debug)]
pub struct MultiplexedConfigBuilder {
    config: MultiplexedConfig,
}

impl MultiplexedConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            config: MultiplexedConfig::default(),
        }
    }

    /// Set the number of physical connections per destination.
    pub fn connect_number(mut self, n: usize) -> Self {
        self.config.connect_number = n;
        self
    }

    /// Set the outbound queue capacity.
    pub fn queue_size(mut self, n: usize) -> Self {
        self.config.queue_size = n;
        self
    }

    /// Fail writes on a full queue instead of waiting.
    pub fn drop_full(mut self, drop_full: bool) -> Self {
        self.config.drop_full = drop_full;
        self
    }

    /// Set the dial timeout.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.config.dial_timeout = timeout;
        self
    }

    /// Set the initial stream read buffer capacity.
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// Set the reconnect backoff range.
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.config.initial_backoff = initial;
        self.config.max_backoff = max;
        self
    }

    /// Set the reconnect attempt budget.
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> MultiplexedConfig {
        self.config
    }
}

impl Default for MultiplexedConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
