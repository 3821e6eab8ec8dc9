//! Registry of connection pools, one per destination.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;
use tracing::debug;

use super::config::PoolConfig;
use super::connection_pool::ConnectionPool;
use super::pool_conn::PoolConn;
use crate::core::{DEFAULT_DIAL_TIMEOUT, FramerBuilder, PoolError};
use crate::transport::{DialOptions, Dialer, NetDialer, TlsOptions, node_key};

/// Per-call options for [`Pool::get`].
///
/// Only the first call for a destination decides the framer builder, TLS
/// parameters and local address of its pool; later calls reuse that pool.
#[derive(Clone, Default)]
pub struct GetOptions {
    framer_builder: Option<Arc<dyn FramerBuilder>>,
    tls: Option<TlsOptions>,
    local_addr: Option<String>,
    dial_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl GetOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a framer to every connection of the pool.
    pub fn framer_builder(mut self, builder: Arc<dyn FramerBuilder>) -> Self {
        self.framer_builder = Some(builder);
        self
    }

    /// Dial with TLS.
    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Bind to a local address before connecting.
    pub fn local_addr(mut self, addr: impl Into<String>) -> Self {
        self.local_addr = Some(addr.into());
        self
    }

    /// Override the pool's dial timeout for this call.
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = Some(timeout);
        self
    }

    /// Caller deadline for the whole `get`.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Effective deadline: the caller's, if sooner than the dial timeout.
    pub fn dial_deadline(&self, default_timeout: Duration) -> Instant {
        let timeout = self
            .dial_timeout
            .filter(|t| !t.is_zero())
            .or_else(|| (!default_timeout.is_zero()).then_some(default_timeout))
            .unwrap_or(DEFAULT_DIAL_TIMEOUT);
        let by_timeout = Instant::now() + timeout;
        match self.deadline {
            Some(deadline) if deadline < by_timeout => deadline,
            _ => by_timeout,
        }
    }

    fn dial_options(&self, network: &str, address: &str) -> DialOptions {
        DialOptions {
            network: network.to_string(),
            address: address.to_string(),
            local_addr: self.local_addr.clone(),
            timeout: Duration::ZERO,
            tls: self.tls.clone(),
        }
    }
}

impl fmt::Debug for GetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GetOptions")
            .field("framer_builder", &self.framer_builder.is_some())
            .field("tls", &self.tls)
            .field("local_addr", &self.local_addr)
            .field("dial_timeout", &self.dial_timeout)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Connection pools keyed by network and address.
///
/// Each destination gets its own [`ConnectionPool`], created on first use
/// with its health loop running.
pub struct Pool {
    config: PoolConfig,
    dialer: Arc<dyn Dialer>,
    pools: DashMap<String, ConnectionPool>,
}

impl Pool {
    /// Create a pool registry that dials with [`NetDialer`].
    pub fn new(config: PoolConfig) -> Self {
        Self::with_dialer(config, Arc::new(NetDialer))
    }

    /// Create a pool registry with a custom dialer.
    pub fn with_dialer(config: PoolConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config,
            dialer,
            pools: DashMap::new(),
        }
    }

    /// Get a connection to `address` over `network`.
    pub async fn get(&self, network: &str, address: &str, opts: GetOptions) -> Result<PoolConn, PoolError> {
        let deadline = opts.dial_deadline(self.config.dial_timeout);
        let pool = self.pool_for(network, address, &opts);
        pool.get(Some(deadline)).await
    }

    /// The pool for a destination, if one was created.
    pub fn connection_pool(&self, network: &str, address: &str) -> Option<ConnectionPool> {
        self.pools.get(&node_key(network, address)).map(|p| p.clone())
    }

    /// Close and forget every destination pool.
    pub fn close(&self) {
        for entry in self.pools.iter() {
            entry.value().close();
        }
        self.pools.clear();
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn pool_for(&self, network: &str, address: &str, opts: &GetOptions) -> ConnectionPool {
        let key = node_key(network, address);
        if let Some(pool) = self.pools.get(&key) {
            return pool.clone();
        }

        let pool = match self.pools.entry(key) {
            Entry::Occupied(entry) => return entry.get().clone(),
            Entry::Vacant(entry) => {
                let pool = ConnectionPool::new(
                    Arc::clone(&self.dialer),
                    opts.dial_options(network, address),
                    self.config.clone(),
                    opts.framer_builder.clone(),
                );
                entry.insert(pool.clone());
                pool
            }
        };

        debug!(network, address, "created connection pool");
        pool.start_health_check(self.config.check_interval);
        pool.initial_connections(self.config.min_idle);
        pool
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.config)
            .field("destinations", &self.pools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfigBuilder;
    use crate::testing::{CountingDialer, spawn_tcp_echo};
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_dial_deadline_prefers_sooner_caller_deadline() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let now = Instant::now();

            let opts = GetOptions::new();
            assert_eq!(opts.dial_deadline(Duration::from_secs(1)), now + Duration::from_secs(1));
            assert_eq!(opts.dial_deadline(Duration::ZERO), now + DEFAULT_DIAL_TIMEOUT);

            let soon = now + Duration::from_millis(10);
            let opts = GetOptions::new().deadline(soon);
            assert_eq!(opts.dial_deadline(Duration::from_secs(1)), soon);

            let late = now + Duration::from_secs(10);
            let opts = GetOptions::new()
                .deadline(late)
                .dial_timeout(Duration::from_millis(300));
            assert_eq!(opts.dial_deadline(Duration::from_secs(1)), now + Duration::from_millis(300));
        });
    }

    #[tokio::test]
    async fn test_one_pool_per_destination() {
        let (addr, _server) = spawn_tcp_echo().await;
        let dialer = Arc::new(CountingDialer::new(NetDialer));
        let pool = Pool::with_dialer(PoolConfig::default(), dialer.clone());

        let a = pool.get("tcp", &addr, GetOptions::new()).await.unwrap();
        drop(a);
        let _b = pool.get("tcp", &addr, GetOptions::new()).await.unwrap();
        assert_eq!(dialer.dials(), 1);

        let cp = pool.connection_pool("tcp", &addr).unwrap();
        assert_eq!(cp.stats().reused, 1);
        assert!(pool.connection_pool("udp", &addr).is_none());
    }

    #[tokio::test]
    async fn test_raw_read_write() {
        let (addr, _server) = spawn_tcp_echo().await;
        let pool = Pool::new(PoolConfig::default());

        let mut conn = pool.get("tcp", &addr, GetOptions::new()).await.unwrap();
        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        AsyncReadExt::read_exact(&mut conn, &mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_min_idle_warms_new_pool() {
        let (addr, _server) = spawn_tcp_echo().await;
        let config = PoolConfigBuilder::new().min_idle(2).build();
        let pool = Pool::new(config);

        let conn = pool.get("tcp", &addr, GetOptions::new()).await.unwrap();
        let cp = pool.connection_pool("tcp", &addr).unwrap();
        for _ in 0..50 {
            if cp.idle_count() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(cp.idle_count(), 2);
        assert_eq!(cp.active_count(), 3);
        drop(conn);
    }

    #[tokio::test]
    async fn test_close_all() {
        let (addr, _server) = spawn_tcp_echo().await;
        let pool = Pool::new(PoolConfig::default());

        drop(pool.get("tcp", &addr, GetOptions::new()).await.unwrap());
        let cp = pool.connection_pool("tcp", &addr).unwrap();
        pool.close();
        assert!(cp.is_closed());
        assert_eq!(cp.idle_count(), 0);
        assert!(pool.connection_pool("tcp", &addr).is_none());
    }
}
