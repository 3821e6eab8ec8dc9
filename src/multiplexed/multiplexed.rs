//! Destination registry and request entry point.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use super::config::MultiplexedConfig;
use super::connection::{Connection, ConnectionParams, ConnectionPhase};
use super::virtual_conn::VirtualConnection;
use crate::core::{FramerBuilder, Msg, MuxError};
use crate::stats::{AtomicMuxStats, MuxStats};
use crate::transport::{DialOptions, Dialer, NetDialer, Network, TlsOptions, node_key};

/// Per-request options for [`Multiplexed::get`].
///
/// The first request to a destination decides the framer builder, TLS
/// parameters and local address of its physical connections.
#[derive(Clone, Default)]
pub struct MuxGetOptions {
    framer_builder: Option<Arc<dyn FramerBuilder>>,
    msg: Option<Arc<dyn Msg>>,
    tls: Option<TlsOptions>,
    local_addr: Option<String>,
    deadline: Option<Instant>,
}

impl MuxGetOptions {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Framer builder; its framers must implement [`Decoder`](crate::core::Decoder).
    pub fn framer_builder(mut self, builder: Arc<dyn FramerBuilder>) -> Self {
        self.framer_builder = Some(builder);
        self
    }

    /// Message carrying the request id.
    pub fn msg(mut self, msg: Arc<dyn Msg>) -> Self {
        self.msg = Some(msg);
        self
    }

    /// Shorthand for a bare request id as the message.
    pub fn request_id(self, id: u32) -> Self {
        self.msg(Arc::new(id))
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

    /// Deadline for the request's write and read.
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl fmt::Debug for MuxGetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxGetOptions")
            .field("framer_builder", &self.framer_builder.is_some())
            .field("request_id", &self.msg.as_ref().map(|m| m.request_id()))
            .field("tls", &self.tls)
            .field("local_addr", &self.local_addr)
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// The physical connections of one destination.
pub(crate) struct Connections {
    id: u64,
    conns: Vec<Arc<Connection>>,
    next: AtomicUsize,
    shutdown: watch::Sender<bool>,
}

impl Connections {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Next connection, round robin.
    fn pick(&self) -> Arc<Connection> {
        let n = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        Arc::clone(&self.conns[n])
    }

    /// Stop every driver of the group.
    pub(crate) fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

pub(crate) struct Inner {
    config: Arc<MultiplexedConfig>,
    dialer: Arc<dyn Dialer>,
    pub(crate) groups: DashMap<String, Arc<Connections>>,
    create_lock: Mutex<()>,
    next_group_id: AtomicU64,
    closed: AtomicBool,
    stats: Arc<AtomicMuxStats>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for group in self.groups.iter() {
            group.shutdown();
        }
    }
}

/// Multiplexes requests over a few physical connections per destination.
///
/// Cloning is cheap and yields a handle to the same multiplexer. Dropping
/// the last handle shuts down every physical connection.
#[derive(Clone)]
pub struct Multiplexed {
    inner: Arc<Inner>,
}

impl Multiplexed {
    /// Create a multiplexer that dials with [`NetDialer`].
    pub fn new(config: MultiplexedConfig) -> Self {
        Self::with_dialer(config, Arc::new(NetDialer))
    }

    /// Create a multiplexer with a custom dialer.
    pub fn with_dialer(config: MultiplexedConfig, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                dialer,
                groups: DashMap::new(),
                create_lock: Mutex::new(()),
                next_group_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                stats: Arc::new(AtomicMuxStats::default()),
            }),
        }
    }

    /// Get a virtual connection to `address` for the request in `opts`.
    ///
    /// The destination's physical connections are created on first use,
    /// exactly once even under concurrent first callers. Never waits on the
    /// network.
    pub async fn get(&self, network: &str, address: &str, opts: MuxGetOptions) -> Result<VirtualConnection, MuxError> {
        if opts.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(MuxError::Timeout);
        }
        let builder = opts.framer_builder.clone().ok_or(MuxError::FramerBuilderNil)?;
        let msg = opts.msg.clone().ok_or(MuxError::MsgNil)?;
        let network: Network = network
            .parse()
            .map_err(|_| MuxError::NetworkNotSupported(network.to_string()))?;
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(MuxError::Closed);
        }

        let conn = self.connection(network, address, builder, &opts)?;
        Ok(VirtualConnection::new(conn, msg, opts.deadline))
    }

    /// Send one request and wait for its response.
    pub async fn round_trip(
        &self,
        network: &str,
        address: &str,
        opts: MuxGetOptions,
        frame: Bytes,
    ) -> Result<Bytes, MuxError> {
        let mut vc = self.get(network, address, opts).await?;
        vc.write(frame).await?;
        vc.read().await
    }

    /// Whether physical connections exist for a destination.
    pub fn contains(&self, network: &str, address: &str) -> bool {
        self.inner.groups.contains_key(&node_key(network, address))
    }

    /// Requests waiting for a response on a destination.
    pub fn pending_requests(&self, network: &str, address: &str) -> Option<usize> {
        let group = self.group(network, address)?;
        Some(group.conns.iter().map(|c| c.pending()).sum())
    }

    /// Lifecycle phase of each physical connection of a destination.
    pub fn phases(&self, network: &str, address: &str) -> Option<Vec<ConnectionPhase>> {
        let group = self.group(network, address)?;
        Some(group.conns.iter().map(|c| c.phase()).collect())
    }

    /// Shut down every physical connection; later `get` calls fail with
    /// [`MuxError::Closed`].
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let _guard = self.inner.create_lock.lock();
        for group in self.inner.groups.iter() {
            group.shutdown();
        }
        self.inner.groups.clear();
        debug!("multiplexer closed");
    }

    /// Multiplexer configuration.
    pub fn config(&self) -> &MultiplexedConfig {
        &self.inner.config
    }

    /// Snapshot of the multiplexer counters.
    pub fn stats(&self) -> MuxStats {
        self.inner.stats.snapshot()
    }

    fn group(&self, network: &str, address: &str) -> Option<Arc<Connections>> {
        self.inner
            .groups
            .get(&node_key(network, address))
            .map(|g| Arc::clone(g.value()))
    }

    fn connection(
        &self,
        network: Network,
        address: &str,
        builder: Arc<dyn FramerBuilder>,
        opts: &MuxGetOptions,
    ) -> Result<Arc<Connection>, MuxError> {
        let key = node_key(network.as_str(), address);
        if let Some(group) = self.inner.groups.get(&key) {
            return Ok(group.pick());
        }

        let _guard = self.inner.create_lock.lock();
        if let Some(group) = self.inner.groups.get(&key) {
            return Ok(group.pick());
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(MuxError::Closed);
        }
        if builder.build().as_decoder().is_none() {
            return Err(MuxError::DecoderNil);
        }

        let config = &self.inner.config;
        let id = self.inner.next_group_id.fetch_add(1, Ordering::Relaxed);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let dial_opts = DialOptions {
            network: network.as_str().to_string(),
            address: address.to_string(),
            local_addr: opts.local_addr.clone(),
            timeout: config.dial_timeout,
            tls: opts.tls.clone(),
        };

        let mut conns = Vec::with_capacity(config.connect_number.max(1));
        let mut drivers = Vec::with_capacity(conns.capacity());
        for _ in 0..config.connect_number.max(1) {
            let (conn, queue_rx) = Connection::new(ConnectionParams {
                key: key.clone(),
                group_id: id,
                dial_opts: dial_opts.clone(),
                is_stream: network.is_stream(),
                dialer: Arc::clone(&self.inner.dialer),
                builder: Arc::clone(&builder),
                config: Arc::clone(config),
                stats: Arc::clone(&self.inner.stats),
                registry: Arc::downgrade(&self.inner),
            });
            drivers.push(Arc::clone(&conn).drive(queue_rx, shutdown_rx.clone()));
            conns.push(conn);
        }

        let group = Arc::new(Connections {
            id,
            conns,
            next: AtomicUsize::new(0),
            shutdown,
        });
        self.inner.groups.insert(key, Arc::clone(&group));
        self.inner.stats.record_group_created();
        debug!(network = %network, address, connections = group.conns.len(), "created connection group");

        for driver in drivers {
            tokio::spawn(driver);
        }
        Ok(group.pick())
    }
}

impl fmt::Debug for Multiplexed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexed")
            .field("config", &self.inner.config)
            .field("destinations", &self.inner.groups.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}
