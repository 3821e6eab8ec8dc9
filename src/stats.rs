//! Lock-free counters for the pool and the multiplexer.
//!
//! Counters use `Relaxed` ordering: they are eventually consistent and meant
//! for observability, never for control flow. Take a [`PoolStats`] or
//! [`MuxStats`] snapshot to read them.

#[cfg(any(feature = "pool", feature = "multiplexed"))]
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of a connection pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections handed out from the idle list.
    pub reused: u64,
    /// Connections dialed (on demand or by the MinIdle refill).
    pub dialed: u64,
    /// Failed `get` calls (dial errors, timeouts, closed pool).
    pub get_errors: u64,
    /// `get` calls rejected because `max_active` was reached.
    pub over_limit: u64,
    /// Idle connections closed because the peer sent unexpected data or failed.
    pub remote_errors: u64,
    /// Idle connections closed because the peer hung up.
    pub remote_eof: u64,
    /// Idle connections evicted for exceeding the idle timeout.
    pub idle_expired: u64,
    /// Idle connections evicted for exceeding the maximum lifetime.
    pub lifetime_expired: u64,
    /// Connections closed because the idle list was full.
    pub idle_overflow: u64,
}

impl PoolStats {
    /// Connections evicted by any health check.
    pub fn evicted_total(&self) -> u64 {
        self.remote_errors + self.remote_eof + self.idle_expired + self.lifetime_expired
    }

    /// Fraction of handed-out connections that came from the idle list.
    pub fn reuse_rate(&self) -> f64 {
        let total = self.reused + self.dialed;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64
        }
    }
}

/// Atomic pool counters for concurrent updates.
#[cfg(feature = "pool")]
#[derive(Debug, Default)]
pub(crate) struct AtomicPoolStats {
    reused: AtomicU64,
    dialed: AtomicU64,
    get_errors: AtomicU64,
    over_limit: AtomicU64,
    remote_errors: AtomicU64,
    remote_eof: AtomicU64,
    idle_expired: AtomicU64,
    lifetime_expired: AtomicU64,
    idle_overflow: AtomicU64,
}

#[cfg(feature = "pool")]
impl AtomicPoolStats {
    pub(crate) fn record_reused(&self) {
        self.reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dialed(&self) {
        self.dialed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get_error(&self) {
        self.get_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_over_limit(&self) {
        self.over_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_error(&self) {
        self.remote_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remote_eof(&self) {
        self.remote_eof.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle_expired(&self) {
        self.idle_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lifetime_expired(&self) {
        self.lifetime_expired.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_idle_overflow(&self) {
        self.idle_overflow.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            reused: self.reused.load(Ordering::Relaxed),
            dialed: self.dialed.load(Ordering::Relaxed),
            get_errors: self.get_errors.load(Ordering::Relaxed),
            over_limit: self.over_limit.load(Ordering::Relaxed),
            remote_errors: self.remote_errors.load(Ordering::Relaxed),
            remote_eof: self.remote_eof.load(Ordering::Relaxed),
            idle_expired: self.idle_expired.load(Ordering::Relaxed),
            lifetime_expired: self.lifetime_expired.load(Ordering::Relaxed),
            idle_overflow: self.idle_overflow.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a multiplexer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    /// Connection groups created.
    pub groups_created: u64,
    /// Connection groups destroyed after exhausting their reconnect budget.
    pub groups_destroyed: u64,
    /// Successful dials of physical connections (initial and reconnects).
    pub dials: u64,
    /// Failed dials of physical connections.
    pub dial_failures: u64,
    /// Stream connections torn down by a fatal read, write or decode error.
    pub fatal_errors: u64,
    /// Datagrams discarded because they could not be decoded.
    pub discarded_packets: u64,
    /// Responses that arrived for a request id nobody was waiting on.
    pub unmatched_responses: u64,
    /// Writes rejected because the queue was full under the drop policy.
    pub queue_full: u64,
}

/// Atomic multiplexer counters for concurrent updates.
#[cfg(feature = "multiplexed")]
#[derive(Debug, Default)]
pub(crate) struct AtomicMuxStats {
    groups_created: AtomicU64,
    groups_destroyed: AtomicU64,
    dials: AtomicU64,
    dial_failures: AtomicU64,
    fatal_errors: AtomicU64,
    discarded_packets: AtomicU64,
    unmatched_responses: AtomicU64,
    queue_full: AtomicU64,
}

#[cfg(feature = "multiplexed")]
impl AtomicMuxStats {
    pub(crate) fn record_group_created(&self) {
        self.groups_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_group_destroyed(&self) {
        self.groups_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dial(&self) {
        self.dials.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dial_failure(&self) {
        self.dial_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fatal_error(&self) {
        self.fatal_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_discarded_packet(&self) {
        self.discarded_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unmatched_response(&self) {
        self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MuxStats {
        MuxStats {
            groups_created: self.groups_created.load(Ordering::Relaxed),
            groups_destroyed: self.groups_destroyed.load(Ordering::Relaxed),
            dials: self.dials.load(Ordering::Relaxed),
            dial_failures: self.dial_failures.load(Ordering::Relaxed),
            fatal_errors: self.fatal_errors.load(Ordering::Relaxed),
            discarded_packets: self.discarded_packets.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
        }
    }
}
