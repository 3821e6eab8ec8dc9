//! Default tunables for the pool and the multiplexer.
//!
//! Every value here can be overridden through the corresponding config
//! builder; these are only the values used when nothing is set.

use std::time::Duration;

// =============================================================================
// CONNECTION POOL
// =============================================================================

/// Dial timeout used when neither the caller nor the pool config sets one.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(200);

/// Idle connections older than this are evicted by the health loop.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(50);

/// Maximum number of idle connections kept per destination.
pub const DEFAULT_MAX_IDLE: usize = 65536;

/// Interval between two runs of the background health loop.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(3);

// =============================================================================
// MULTIPLEXER
// =============================================================================

/// Physical connections opened per destination.
pub const DEFAULT_CONNECT_NUMBER: usize = 2;

/// Capacity of the per-connection outbound frame queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// Dial timeout for multiplexed physical connections.
pub const DEFAULT_MUX_DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// Initial capacity of the stream read buffer.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 128 * 1024;

/// Largest datagram accepted by the packet reader.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// =============================================================================
// RECONNECT
// =============================================================================

/// Delay before the second reconnect attempt.
pub const INITIAL_BACKOFF: Duration = Duration::from_millis(5);

/// Upper bound of the reconnect delay.
pub const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Failed dials tolerated before a connection group is destroyed.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

// =============================================================================
// TLS SENTINELS
// =============================================================================

/// CA file value meaning "do not verify the server certificate".
pub const CA_FILE_SKIP_VERIFY: &str = "none";

/// CA file value meaning "verify against the system trust store".
pub const CA_FILE_SYSTEM_ROOTS: &str = "root";
