//! Per-destination pool of idle physical connections.
//!
//! # Accounting
//!
//! `active` counts every connection the pool owns: idle ones plus those
//! checked out as [`PoolConn`]. It is incremented before a dial and
//! decremented whenever a connection is closed, so `active == idle + out`
//! holds outside the critical sections.
//!
//! When `wait` is set together with `max_active`, a semaphore with
//! `max_active` permits gates `get`. A checked-out connection holds one
//! permit and gives it back on release; idle connections hold none.
//!
//! All list mutation happens under one mutex; dials and closes happen
//! outside it.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::config::PoolConfig;
use super::idle::IdleList;
use super::pool_conn::PoolConn;
use crate::core::{DEFAULT_DIAL_TIMEOUT, Framer, FramerBuilder, PoolError};
use crate::stats::{AtomicPoolStats, PoolStats};
use crate::transport::{Conn, DialOptions, Dialer};

/// Health check function: `(entry, fast)` returns `true` if the connection is
/// still usable.
///
/// `fast` is set when the check runs on the `get` path and should cost no
/// more than a syscall; the background loop runs the full check.
pub type HealthChecker = Arc<dyn Fn(&PoolEntry, bool) -> bool + Send + Sync>;

/// A physical connection owned by the pool, with its framing state.
pub struct PoolEntry {
    pub(super) conn: Conn,
    pub(super) framer: Option<Box<dyn Framer>>,
    pub(super) read_buf: BytesMut,
    created: Instant,
    idle_since: Instant,
}

impl PoolEntry {
    fn new(conn: Conn, framer: Option<Box<dyn Framer>>) -> Self {
        let now = Instant::now();
        Self {
            conn,
            framer,
            read_buf: BytesMut::new(),
            created: now,
            idle_since: now,
        }
    }

    /// The underlying connection.
    pub fn conn(&self) -> &Conn {
        &self.conn
    }

    /// When the connection was dialed.
    pub fn created(&self) -> Instant {
        self.created
    }

    /// When the connection was last returned to the idle list.
    pub fn idle_since(&self) -> Instant {
        self.idle_since
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("conn", &self.conn)
            .field("framed", &self.framer.is_some())
            .field("created", &self.created)
            .field("idle_since", &self.idle_since)
            .finish()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    closed: bool,
    active: usize,
    idle: IdleList<PoolEntry>,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    dialer: Arc<dyn Dialer>,
    dial_opts: DialOptions,
    framer_builder: Option<Arc<dyn FramerBuilder>>,
    state: Mutex<PoolState>,
    permits: OnceLock<Arc<Semaphore>>,
    checker: Mutex<Option<HealthChecker>>,
    checker_gen: AtomicU64,
    stats: AtomicPoolStats,
}

impl PoolInner {
    pub(super) fn force_close(&self) -> bool {
        self.config.force_close
    }

    pub(super) fn address(&self) -> &str {
        &self.dial_opts.address
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn get_conn(self: &Arc<Self>, deadline: Option<Instant>, force_new: bool) -> Result<PoolConn, PoolError> {
        let permit = if self.config.wait && self.config.max_active > 0 {
            let permits = self
                .permits
                .get_or_init(|| Arc::new(Semaphore::new(self.config.max_active)));
            let acquire = Arc::clone(permits).acquire_owned();
            let acquired = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, acquire)
                    .await
                    .map_err(|_| PoolError::Timeout)?,
                None => acquire.await,
            };
            Some(acquired.map_err(|_| PoolError::Closed)?)
        } else {
            None
        };

        if !force_new {
            if let Some(entry) = self.idle_conn() {
                self.stats.record_reused();
                return Ok(PoolConn::new(entry, Arc::clone(self), permit));
            }
        }

        let entry = self.new_conn(deadline).await?;
        Ok(PoolConn::new(entry, Arc::clone(self), permit))
    }

    /// Pop idle connections until one passes the fast check.
    fn idle_conn(&self) -> Option<PoolEntry> {
        loop {
            let entry = self.state.lock().idle.pop_head()?;
            if self.check(&entry, true) {
                return Some(entry);
            }
            drop(entry);
            self.state.lock().active -= 1;
        }
    }

    async fn new_conn(&self, deadline: Option<Instant>) -> Result<PoolEntry, PoolError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if !self.config.wait && self.config.max_active > 0 && state.active >= self.config.max_active {
                self.stats.record_over_limit();
                return Err(PoolError::Limit);
            }
            state.active += 1;
        }

        match self.dial(deadline).await {
            Ok(conn) => {
                self.stats.record_dialed();
                debug!(address = %self.dial_opts.address, network = %self.dial_opts.network, "dialed pooled connection");
                let framer = self.framer_builder.as_ref().map(|b| b.build());
                Ok(PoolEntry::new(conn, framer))
            }
            Err(e) => {
                self.state.lock().active -= 1;
                Err(e)
            }
        }
    }

    async fn dial(&self, deadline: Option<Instant>) -> Result<Conn, PoolError> {
        let deadline = deadline.ok_or(PoolError::NoDeadline)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(PoolError::Timeout);
        }
        let opts = DialOptions {
            timeout: remaining,
            ..self.dial_opts.clone()
        };
        match tokio::time::timeout_at(deadline, self.dialer.dial(&opts)).await {
            Ok(conn) => Ok(conn?),
            Err(_) => Err(PoolError::Timeout),
        }
    }

    /// Return a connection to the pool, or close it.
    pub(super) fn put(&self, mut entry: PoolEntry, force: bool) {
        let evicted = {
            let mut state = self.state.lock();
            if state.closed || force {
                Some(entry)
            } else {
                entry.idle_since = Instant::now();
                state.idle.push_head(entry);
                if state.idle.len() > self.config.max_idle {
                    self.stats.record_idle_overflow();
                    state.idle.pop_tail()
                } else {
                    None
                }
            }
        };
        if let Some(entry) = evicted {
            drop(entry);
            self.state.lock().active -= 1;
        }
    }

    fn check(&self, entry: &PoolEntry, fast: bool) -> bool {
        let custom = self.checker.lock().clone();
        match custom {
            Some(checker) => checker(entry, fast),
            None => self.default_check(entry, fast),
        }
    }

    fn default_check(&self, entry: &PoolEntry, fast: bool) -> bool {
        if let Err(e) = entry.conn.probe() {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                self.stats.record_remote_eof();
            } else {
                self.stats.record_remote_error();
            }
            debug!(address = %self.dial_opts.address, error = %e, "discarding idle connection");
            return false;
        }
        if fast {
            return true;
        }
        let now = Instant::now();
        if !self.config.idle_timeout.is_zero() && now.duration_since(entry.idle_since) > self.config.idle_timeout {
            self.stats.record_idle_expired();
            trace!(address = %self.dial_opts.address, "idle timeout");
            return false;
        }
        if !self.config.max_conn_lifetime.is_zero()
            && now.duration_since(entry.created) > self.config.max_conn_lifetime
        {
            self.stats.record_lifetime_expired();
            trace!(address = %self.dial_opts.address, "lifetime exceeded");
            return false;
        }
        true
    }

    fn check_health_once(&self) {
        let n = self.state.lock().idle.len();
        for _ in 0..n {
            let Some(entry) = self.state.lock().idle.pop_head() else {
                break;
            };
            if self.check(&entry, false) {
                let mut state = self.state.lock();
                if !state.closed {
                    state.idle.push_tail(entry);
                    continue;
                }
            }
            drop(entry);
            self.state.lock().active -= 1;
        }
    }

    fn check_min_idle(self: &Arc<Self>) {
        if self.config.min_idle == 0 {
            return;
        }
        let idle = self.state.lock().idle.len();
        if idle < self.config.min_idle {
            self.initial_connections(self.config.min_idle - idle);
        }
    }

    /// Dial `count` connections in the background and park them idle.
    pub(super) fn initial_connections(self: &Arc<Self>, count: usize) {
        if count == 0 {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            warn!(address = %self.dial_opts.address, "no tokio runtime, skipping idle refill");
            return;
        };
        let inner = Arc::clone(self);
        handle.spawn(async move {
            let mut dials = JoinSet::new();
            for _ in 0..count {
                let inner = Arc::clone(&inner);
                dials.spawn(async move {
                    inner
                        .get_conn(Some(Instant::now() + DEFAULT_DIAL_TIMEOUT), true)
                        .await
                });
            }
            let mut warmed = Vec::with_capacity(count);
            while let Some(res) = dials.join_next().await {
                if let Ok(Ok(conn)) = res {
                    warmed.push(conn);
                }
            }
            debug!(address = %inner.dial_opts.address, requested = count, warmed = warmed.len(), "idle refill");
            // Releasing parks them on the idle list.
            drop(warmed);
        });
    }

    pub(super) fn start_health_loop(self: &Arc<Self>, interval: Duration) {
        let generation = self.checker_gen.fetch_add(1, Ordering::AcqRel) + 1;
        let Ok(handle) = Handle::try_current() else {
            warn!(address = %self.dial_opts.address, "no tokio runtime, health loop not started");
            return;
        };
        let weak: Weak<Self> = Arc::downgrade(self);
        handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.is_closed() || inner.checker_gen.load(Ordering::Acquire) != generation {
                    break;
                }
                inner.check_health_once();
                inner.check_min_idle();
            }
        });
    }

    fn close(&self) {
        let drained = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let drained = state.idle.drain();
            state.active -= drained.len();
            drained
        };
        if let Some(permits) = self.permits.get() {
            permits.close();
        }
        debug!(address = %self.dial_opts.address, closed_idle = drained.len(), "connection pool closed");
        drop(drained);
    }
}

/// Pool of connections to a single destination.
///
/// Cloning is cheap and yields a handle to the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool that dials with `dialer` using `dial_opts`.
    ///
    /// The dial timeout in `dial_opts` is ignored: each dial gets the time
    /// left until the deadline passed to [`get`](Self::get). No health loop
    /// runs until [`register_checker`](Self::register_checker) or
    /// [`start_health_check`](Self::start_health_check) is called.
    pub fn new(
        dialer: Arc<dyn Dialer>,
        dial_opts: DialOptions,
        config: PoolConfig,
        framer_builder: Option<Arc<dyn FramerBuilder>>,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                dialer,
                dial_opts,
                framer_builder,
                state: Mutex::new(PoolState::default()),
                permits: OnceLock::new(),
                checker: Mutex::new(None),
                checker_gen: AtomicU64::new(0),
                stats: AtomicPoolStats::default(),
            }),
        }
    }

    /// Get a connection: a healthy idle one if available, else a new dial.
    ///
    /// `deadline` bounds both the wait for a free slot and the dial. A dial
    /// without a deadline fails with [`PoolError::NoDeadline`].
    pub async fn get(&self, deadline: Option<Instant>) -> Result<PoolConn, PoolError> {
        let res = self.inner.get_conn(deadline, false).await;
        if res.is_err() {
            self.inner.stats.record_get_error();
        }
        res
    }

    /// Replace the health checker and (re)start the health loop.
    ///
    /// Does nothing if `interval` is zero. Must be called from within a
    /// tokio runtime.
    pub fn register_checker(&self, interval: Duration, checker: HealthChecker) {
        if interval.is_zero() {
            return;
        }
        *self.inner.checker.lock() = Some(checker);
        self.inner.start_health_loop(interval);
    }

    /// Start the health loop with the default checker.
    pub fn start_health_check(&self, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        *self.inner.checker.lock() = None;
        self.inner.start_health_loop(interval);
    }

    /// Run the default checker, ignoring any registered one.
    pub fn default_check(&self, entry: &PoolEntry, fast: bool) -> bool {
        self.inner.default_check(entry, fast)
    }

    /// Run one full health pass over the idle list.
    pub fn check_health_once(&self) {
        self.inner.check_health_once();
    }

    /// Dial in the background until `min_idle` connections are idle.
    pub fn check_min_idle(&self) {
        self.inner.check_min_idle();
    }

    /// Warm the pool with `count` connections dialed in parallel.
    pub fn initial_connections(&self, count: usize) {
        self.inner.initial_connections(count);
    }

    /// Close the pool: idle connections are closed, waiters fail with
    /// [`PoolError::Closed`], and later releases close their connection.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.state.lock().idle.len()
    }

    /// Number of connections owned by the pool (idle plus checked out).
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.snapshot()
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.dial_opts.address)
            .field("closed", &state.closed)
            .field("active", &state.active)
            .field("idle", &state.idle.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfigBuilder;
    use crate::testing::{CountingDialer, LengthPrefixed, encode_frame, spawn_tcp_echo};
    use crate::transport::NetDialer;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn deadline() -> Option<Instant> {
        Some(Instant::now() + Duration::from_secs(1))
    }

    fn pool_for(addr: &str, config: PoolConfig) -> ConnectionPool {
        ConnectionPool::new(Arc::new(NetDialer), DialOptions::new("tcp", addr), config, None)
    }

    /// Accepts and holds connections open without ever writing.
    async fn spawn_sink() -> (String, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_reuses_idle_connection_lifo() {
        let (addr, _server) = spawn_sink().await;
        let pool = pool_for(&addr, PoolConfig::default());

        let a = pool.get(deadline()).await.unwrap();
        let b = pool.get(deadline()).await.unwrap();
        let a_local = a.local_addr().unwrap();
        let b_local = b.local_addr().unwrap();
        assert_eq!(pool.active_count(), 2);

        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 2);

        // Most recently returned first.
        let c = pool.get(deadline()).await.unwrap();
        assert_eq!(c.local_addr().unwrap(), b_local);
        let d = pool.get(deadline()).await.unwrap();
        assert_eq!(d.local_addr().unwrap(), a_local);
        assert_eq!(pool.stats().reused, 2);
        assert_eq!(pool.stats().dialed, 2);
    }

    #[tokio::test]
    async fn test_limit_without_wait() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new().max_active(2).build();
        let pool = pool_for(&addr, config);

        let _a = pool.get(deadline()).await.unwrap();
        let _b = pool.get(deadline()).await.unwrap();
        let err = pool.get(deadline()).await.unwrap_err();
        assert!(matches!(err, PoolError::Limit));
        assert_eq!(pool.stats().over_limit, 1);
        assert_eq!(pool.stats().get_errors, 1);
    }

    #[tokio::test]
    async fn test_wait_blocks_until_release() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new().max_active(1).wait(true).build();
        let pool = pool_for(&addr, config);

        let first = pool.get(deadline()).await.unwrap();
        let first_local = first.local_addr().unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get(Some(Instant::now() + Duration::from_secs(5))).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.local_addr().unwrap(), first_local);
        assert_eq!(pool.active_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_respects_deadline() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new().max_active(1).wait(true).build();
        let pool = pool_for(&addr, config);

        let _held = pool.get(deadline()).await.unwrap();
        let err = pool
            .get(Some(Instant::now() + Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Timeout));
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new().max_active(1).wait(true).build();
        let pool = pool_for(&addr, config);

        let held = pool.get(deadline()).await.unwrap();
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get(None).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        pool.close();
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));

        // Releases after close close the connection.
        drop(held);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
        assert!(matches!(pool.get(deadline()).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn test_idle_bound() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new().max_idle(2).build();
        let pool = pool_for(&addr, config);

        let mut conns = Vec::new();
        for _ in 0..5 {
            conns.push(pool.get(deadline()).await.unwrap());
        }
        assert_eq!(pool.active_count(), 5);

        for mut conn in conns {
            conn.close().unwrap();
        }
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.stats().idle_overflow, 3);
    }

    #[tokio::test]
    async fn test_no_deadline_for_new_dial() {
        let (addr, _server) = spawn_sink().await;
        let pool = pool_for(&addr, PoolConfig::default());

        let err = pool.get(None).await.unwrap_err();
        assert!(matches!(err, PoolError::NoDeadline));
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_dial_failure_releases_accounting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let config = PoolConfigBuilder::new().max_active(1).build();
        let pool = pool_for(&addr, config);
        let err = pool.get(deadline()).await.unwrap_err();
        assert!(matches!(err, PoolError::Dial(_)));
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_fast_check_discards_closed_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let pool = pool_for(&addr, PoolConfig::default());

        let conn = pool.get(deadline()).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(conn);
        assert_eq!(pool.idle_count(), 1);

        drop(server_side);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The dead idle connection is skipped and a fresh one is dialed.
        let fresh = pool.get(deadline()).await.unwrap();
        assert_eq!(pool.stats().remote_eof, 1);
        assert_eq!(pool.stats().dialed, 2);
        assert_eq!(pool.active_count(), 1);
        drop(fresh);
    }

    #[tokio::test]
    async fn test_health_pass_evicts_unexpected_data() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let pool = pool_for(&addr, PoolConfig::default());

        let a = pool.get(deadline()).await.unwrap();
        let (mut chatty, _) = listener.accept().await.unwrap();
        let b = pool.get(deadline()).await.unwrap();
        let (_quiet, _) = listener.accept().await.unwrap();
        drop(a);
        drop(b);

        chatty.write_all(b"?").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.check_health_once();
        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.stats().remote_errors, 1);
    }

    #[tokio::test]
    async fn test_health_pass_evicts_idle_timeout() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new()
            .idle_timeout(Duration::from_millis(20))
            .build();
        let pool = pool_for(&addr, config);

        drop(pool.get(deadline()).await.unwrap());
        pool.check_health_once();
        assert_eq!(pool.idle_count(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        pool.check_health_once();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.stats().idle_expired, 1);
    }

    #[tokio::test]
    async fn test_health_pass_evicts_lifetime() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new()
            .max_conn_lifetime(Duration::from_millis(20))
            .build();
        let pool = pool_for(&addr, config);

        let conn = pool.get(deadline()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(conn);

        pool.check_health_once();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.stats().lifetime_expired, 1);
    }

    #[tokio::test]
    async fn test_min_idle_refill() {
        let (addr, _server) = spawn_sink().await;
        let dialer = Arc::new(CountingDialer::new(NetDialer));
        let config = PoolConfigBuilder::new().min_idle(3).build();
        let pool = ConnectionPool::new(dialer.clone(), DialOptions::new("tcp", &addr), config, None);

        pool.check_min_idle();
        for _ in 0..50 {
            if pool.idle_count() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(pool.idle_count(), 3);
        assert_eq!(pool.active_count(), 3);
        assert_eq!(dialer.dials(), 3);
    }

    #[tokio::test]
    async fn test_custom_checker_loop() {
        let (addr, _server) = spawn_sink().await;
        let pool = pool_for(&addr, PoolConfig::default());
        drop(pool.get(deadline()).await.unwrap());
        assert_eq!(pool.idle_count(), 1);

        pool.register_checker(Duration::from_millis(10), Arc::new(|_: &PoolEntry, fast| fast));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_read_frame_with_framer() {
        let (addr, _server) = spawn_tcp_echo().await;
        let pool = ConnectionPool::new(
            Arc::new(NetDialer),
            DialOptions::new("tcp", &addr),
            PoolConfig::default(),
            Some(Arc::new(LengthPrefixed)),
        );

        let mut conn = pool.get(deadline()).await.unwrap();
        conn.write_all(&encode_frame(7, b"hello")).await.unwrap();
        let frame = conn.read_frame().await.unwrap();
        assert_eq!(frame, encode_frame(7, b"hello"));

        conn.close().unwrap();
        assert!(matches!(conn.close(), Err(PoolError::ConnClosed)));
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn test_read_frame_without_framer_force_closes() {
        let (addr, _server) = spawn_sink().await;
        let pool = pool_for(&addr, PoolConfig::default());

        let mut conn = pool.get(deadline()).await.unwrap();
        assert!(matches!(conn.read_frame().await, Err(PoolError::FramerNotSet)));
        assert!(matches!(conn.read_frame().await, Err(PoolError::ConnClosed)));
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn test_force_close_mode() {
        let (addr, _server) = spawn_sink().await;
        let config = PoolConfigBuilder::new().force_close(true).build();
        let pool = pool_for(&addr, config);

        let mut conn = pool.get(deadline()).await.unwrap();
        conn.close().unwrap();
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active_count(), 0);
    }
}
