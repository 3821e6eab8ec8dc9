//! One physical connection shared by many virtual connections.
//!
//! Each [`Connection`] is owned by a driver task that dials, runs the reader
//! and writer side by side, and reconnects with backoff when a stream
//! fails. Callers never touch the socket: they register a response slot in
//! the routing table and push frames onto the bounded write queue.
//!
//! ```text
//!            ┌──────────── driver task ─────────────┐
//!  write ──► │ queue ──► writer ──► socket          │
//!            │                        │             │
//!  read  ◄── │ route[id] ◄── reader ◄─┘  (decode)   │
//!            └──────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::backoff::Backoff;
use super::config::MultiplexedConfig;
use super::multiplexed::Inner;
use crate::core::{Decoder, Framer, FramerBuilder, MAX_DATAGRAM_SIZE, Msg, MuxError, ResponseFrame, TransportError, detach};
use crate::stats::AtomicMuxStats;
use crate::transport::{Conn, DialOptions, Dialer};

/// Lifecycle of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// First dial in progress.
    Connecting,
    /// Connected; reader and writer running.
    Active,
    /// Stream failed; redialing with backoff.
    Reconnecting,
    /// Gave up or shut down; the destination entry is gone.
    Destroyed,
}

/// What a waiting reader receives: the response bytes or why it never came.
pub(crate) type Delivery = Result<Bytes, MuxError>;

struct Route {
    token: u64,
    tx: oneshot::Sender<Delivery>,
    msg: Arc<dyn Msg>,
}

struct Routing {
    routes: HashMap<u32, Route>,
    phase: ConnectionPhase,
    /// Set once the connection is gone for good; new routes fail with it.
    closed: Option<MuxError>,
}

enum Outcome {
    Shutdown,
    Failed(io::Error),
}

enum EstablishError {
    Dial(TransportError),
    NoDecoder,
}

/// A physical connection to one destination.
pub(crate) struct Connection {
    key: String,
    group_id: u64,
    dial_opts: DialOptions,
    is_stream: bool,
    dialer: Arc<dyn Dialer>,
    builder: Arc<dyn FramerBuilder>,
    config: Arc<MultiplexedConfig>,
    stats: Arc<AtomicMuxStats>,
    registry: Weak<Inner>,
    routing: Mutex<Routing>,
    queue: mpsc::Sender<Bytes>,
    next_token: AtomicU64,
    /// Frames decoded over the connection's lifetime, across reconnects.
    decoded: AtomicU64,
    peer: Mutex<Option<SocketAddr>>,
}

/// Everything a connection needs that is shared with its group.
pub(crate) struct ConnectionParams {
    pub(crate) key: String,
    pub(crate) group_id: u64,
    pub(crate) dial_opts: DialOptions,
    pub(crate) is_stream: bool,
    pub(crate) dialer: Arc<dyn Dialer>,
    pub(crate) builder: Arc<dyn FramerBuilder>,
    pub(crate) config: Arc<MultiplexedConfig>,
    pub(crate) stats: Arc<AtomicMuxStats>,
    pub(crate) registry: Weak<Inner>,
}

impl Connection {
    /// Create a connection and the receiving end of its write queue, which
    /// belongs to the driver.
    pub(crate) fn new(params: ConnectionParams) -> (Arc<Self>, mpsc::Receiver<Bytes>) {
        let (queue, queue_rx) = mpsc::channel(params.config.queue_size.max(1));
        let conn = Arc::new(Self {
            key: params.key,
            group_id: params.group_id,
            dial_opts: params.dial_opts,
            is_stream: params.is_stream,
            dialer: params.dialer,
            builder: params.builder,
            config: params.config,
            stats: params.stats,
            registry: params.registry,
            routing: Mutex::new(Routing {
                routes: HashMap::new(),
                phase: ConnectionPhase::Connecting,
                closed: None,
            }),
            queue,
            next_token: AtomicU64::new(1),
            decoded: AtomicU64::new(0),
            peer: Mutex::new(None),
        });
        (conn, queue_rx)
    }

    // =========================================================================
    // Caller side
    // =========================================================================

    /// Register a response slot for `msg`'s request id.
    ///
    /// A slot already registered under the same id is dropped, so its reader
    /// fails with [`MuxError::ChanClosed`] instead of silently missing data.
    pub(crate) fn register(&self, msg: Arc<dyn Msg>) -> (u64, oneshot::Receiver<Delivery>) {
        let request_id = msg.request_id();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut routing = self.routing.lock();
        if let Some(err) = routing.closed.clone() {
            let _ = tx.send(Err(err));
        } else if let Some(prev) = routing.routes.insert(request_id, Route { token, tx, msg }) {
            trace!(address = %self.dial_opts.address, request_id, "replacing duplicate request id");
            drop(prev);
        }
        (token, rx)
    }

    /// Remove the route for `request_id` if it still belongs to `token`.
    pub(crate) fn remove(&self, request_id: u32, token: u64) {
        let mut routing = self.routing.lock();
        if routing.routes.get(&request_id).is_some_and(|r| r.token == token) {
            routing.routes.remove(&request_id);
        }
    }

    /// Queue a frame for the writer.
    pub(crate) async fn send(&self, frame: Bytes, deadline: Option<Instant>) -> Result<(), MuxError> {
        if self.config.drop_full {
            return self.queue.try_send(frame).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    self.stats.record_queue_full();
                    MuxError::QueueFull
                }
                mpsc::error::TrySendError::Closed(_) => MuxError::Closed,
            });
        }
        let send = self.queue.send(frame);
        let res = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, send)
                .await
                .map_err(|_| MuxError::Timeout)?,
            None => send.await,
        };
        res.map_err(|_| MuxError::Closed)
    }

    /// Number of requests waiting for a response.
    pub(crate) fn pending(&self) -> usize {
        self.routing.lock().routes.len()
    }

    pub(crate) fn phase(&self) -> ConnectionPhase {
        self.routing.lock().phase
    }

    pub(crate) fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.lock()
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Own the physical connection until shutdown or until the reconnect
    /// budget is spent.
    pub(crate) async fn drive(self: Arc<Self>, mut queue: mpsc::Receiver<Bytes>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(
            self.config.initial_backoff,
            self.config.max_backoff,
            self.config.max_reconnect_attempts,
        );

        loop {
            let established = tokio::select! {
                biased;
                _ = shutdown.wait_for(|closed| *closed) => None,
                res = self.establish() => Some(res),
            };
            let Some(established) = established else {
                self.terminate(MuxError::Closed);
                return;
            };

            match established {
                Ok((conn, framer)) => {
                    self.activate(&conn);
                    let decoded = self.decoded.load(Ordering::Relaxed);
                    let outcome = match conn.into_udp() {
                        Ok(socket) => self.serve_datagram(socket, framer, &mut queue, &mut shutdown).await,
                        Err(conn) => self.serve_stream(conn, framer, &mut queue, &mut shutdown).await,
                    };
                    match outcome {
                        Outcome::Shutdown => {
                            self.terminate(MuxError::Closed);
                            return;
                        }
                        Outcome::Failed(e) => {
                            self.stats.record_fatal_error();
                            debug!(address = %self.dial_opts.address, error = %e, "connection failed");
                            let err = MuxError::Connection(Arc::new(TransportError::Io(e)));
                            if !self.is_stream {
                                self.destroy(err);
                                return;
                            }
                            // Only a connection that carried a response earns a fresh budget.
                            if self.decoded.load(Ordering::Relaxed) > decoded {
                                backoff.reset();
                            }
                            let dropped = drain_queue(&mut queue);
                            if dropped > 0 {
                                debug!(address = %self.dial_opts.address, dropped, "dropped queued frames of failed requests");
                            }
                            self.fail(err.clone());
                            if !self.back_off(&mut backoff, err, &mut shutdown).await {
                                return;
                            }
                        }
                    }
                }
                Err(EstablishError::NoDecoder) => {
                    self.destroy(MuxError::DecoderNil);
                    return;
                }
                Err(EstablishError::Dial(e)) => {
                    self.stats.record_dial_failure();
                    debug!(address = %self.dial_opts.address, attempt = backoff.attempt(), error = %e, "dial failed");
                    let err = MuxError::Connection(Arc::new(e));
                    if !self.is_stream {
                        self.destroy(err);
                        return;
                    }
                    self.fail(err.clone());
                    if !self.back_off(&mut backoff, err, &mut shutdown).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep out the next reconnect delay.
    ///
    /// Returns `false` when the driver must stop: the budget is spent (the
    /// destination is dropped) or the group is shutting down.
    async fn back_off(&self, backoff: &mut Backoff, err: MuxError, shutdown: &mut watch::Receiver<bool>) -> bool {
        let Some(delay) = backoff.next_delay() else {
            warn!(
                address = %self.dial_opts.address,
                attempts = self.config.max_reconnect_attempts,
                "reconnect budget exhausted, dropping destination"
            );
            self.destroy(err);
            return false;
        };
        tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => {
                self.terminate(MuxError::Closed);
                false
            }
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn establish(&self) -> Result<(Conn, Box<dyn Framer>), EstablishError> {
        let mut framer = self.builder.build();
        if framer.as_decoder().is_none() {
            return Err(EstablishError::NoDecoder);
        }
        let timeout = self.dial_opts.timeout;
        let dial = self.dialer.dial(&self.dial_opts);
        let conn = if timeout.is_zero() {
            dial.await
        } else {
            tokio::time::timeout(timeout, dial)
                .await
                .unwrap_or(Err(TransportError::Timeout(timeout)))
        };
        conn.map(|conn| (conn, framer)).map_err(EstablishError::Dial)
    }

    fn activate(&self, conn: &Conn) {
        self.stats.record_dial();
        *self.peer.lock() = conn.peer_addr().ok();
        let mut routing = self.routing.lock();
        let previous = routing.phase;
        routing.phase = ConnectionPhase::Active;
        debug!(address = %self.dial_opts.address, network = %self.dial_opts.network, ?previous, "connection active");
    }

    async fn serve_stream(
        &self,
        conn: Conn,
        mut framer: Box<dyn Framer>,
        queue: &mut mpsc::Receiver<Bytes>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let safe = framer.is_safe();
        let buffer_size = self.config.read_buffer_size.max(1);
        let (mut rd, mut wr) = tokio::io::split(conn);

        // Any decode error desynchronizes the byte stream, so it is fatal.
        let reader = async {
            let mut buf = BytesMut::with_capacity(buffer_size);
            loop {
                let Some(decoder) = framer.as_decoder() else {
                    return io::Error::new(io::ErrorKind::InvalidInput, MuxError::DecoderNil);
                };
                loop {
                    match decoder.decode(&mut buf) {
                        Ok(Some(frame)) => self.dispatch(frame, decoder, safe),
                        Ok(None) => break,
                        Err(e) => return e,
                    }
                }
                if buf.capacity() == buf.len() {
                    buf.reserve(buffer_size);
                }
                match rd.read_buf(&mut buf).await {
                    Ok(0) => return io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer"),
                    Ok(_) => {}
                    Err(e) => return e,
                }
            }
        };

        let writer = async {
            while let Some(frame) = queue.recv().await {
                if let Err(e) = wr.write_all(&frame).await {
                    return e;
                }
                if let Err(e) = wr.flush().await {
                    return e;
                }
            }
            io::Error::new(io::ErrorKind::BrokenPipe, "write queue closed")
        };

        tokio::select! {
            e = reader => Outcome::Failed(e),
            e = writer => Outcome::Failed(e),
            _ = shutdown.wait_for(|closed| *closed) => Outcome::Shutdown,
        }
    }

    async fn serve_datagram(
        &self,
        socket: UdpSocket,
        mut framer: Box<dyn Framer>,
        queue: &mut mpsc::Receiver<Bytes>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Outcome {
        let safe = framer.is_safe();
        let socket = &socket;

        // Every datagram stands alone: a bad one is dropped and reading goes on.
        let reader = async {
            let mut raw = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                let n = match socket.recv(&mut raw).await {
                    Ok(n) => n,
                    Err(e) => {
                        trace!(address = %self.dial_opts.address, error = %e, "datagram receive failed");
                        continue;
                    }
                };
                let Some(decoder) = framer.as_decoder() else {
                    return io::Error::new(io::ErrorKind::InvalidInput, MuxError::DecoderNil);
                };
                let mut packet = BytesMut::from(&raw[..n]);
                match decoder.decode(&mut packet) {
                    Ok(Some(frame)) if packet.is_empty() => self.dispatch(frame, decoder, safe),
                    Ok(Some(_)) => self.discard("remaining data in buffer"),
                    Ok(None) => self.discard("incomplete datagram"),
                    Err(e) => self.discard(&e.to_string()),
                }
            }
        };

        let writer = async {
            while let Some(frame) = queue.recv().await {
                match socket.send(&frame).await {
                    Ok(n) if n == frame.len() => {}
                    Ok(n) => trace!(address = %self.dial_opts.address, sent = n, len = frame.len(), "short datagram send"),
                    Err(e) => trace!(address = %self.dial_opts.address, error = %e, "datagram send failed"),
                }
            }
            io::Error::new(io::ErrorKind::BrokenPipe, "write queue closed")
        };

        tokio::select! {
            e = reader => Outcome::Failed(e),
            e = writer => Outcome::Failed(e),
            _ = shutdown.wait_for(|closed| *closed) => Outcome::Shutdown,
        }
    }

    fn discard(&self, reason: &str) {
        self.stats.record_discarded_packet();
        trace!(address = %self.dial_opts.address, reason, "discarding datagram");
    }

    /// Hand a decoded response to the virtual connection waiting for it.
    fn dispatch(&self, frame: ResponseFrame, decoder: &mut dyn Decoder, safe: bool) {
        self.decoded.fetch_add(1, Ordering::Relaxed);
        let request_id = frame.request_id();
        let route = self.routing.lock().routes.remove(&request_id);
        let Some(route) = route else {
            self.stats.record_unmatched_response();
            trace!(address = %self.dial_opts.address, request_id, "no reader for response");
            return;
        };
        decoder.update_msg(&frame, route.msg.as_ref());
        let payload = detach(frame.into_payload(), safe);
        let _ = route.tx.send(Ok(payload));
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Fail every in-flight request with `err`; the connection will redial.
    fn fail(&self, err: MuxError) {
        let routes = {
            let mut routing = self.routing.lock();
            routing.phase = ConnectionPhase::Reconnecting;
            std::mem::take(&mut routing.routes)
        };
        deliver_error(routes, &err);
    }

    /// Fail every in-flight and future request with `err`.
    fn terminate(&self, err: MuxError) {
        let routes = {
            let mut routing = self.routing.lock();
            routing.phase = ConnectionPhase::Destroyed;
            routing.closed = Some(err.clone());
            std::mem::take(&mut routing.routes)
        };
        *self.peer.lock() = None;
        deliver_error(routes, &err);
    }

    /// Terminate and remove the whole destination so the next `get` starts
    /// from scratch.
    fn destroy(&self, err: MuxError) {
        self.terminate(err);
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        if let Some((_, group)) = inner.groups.remove_if(&self.key, |_, g| g.id() == self.group_id) {
            self.stats.record_group_destroyed();
            debug!(address = %self.dial_opts.address, network = %self.dial_opts.network, "destination dropped");
            group.shutdown();
        }
    }
}

fn deliver_error(routes: HashMap<u32, Route>, err: &MuxError) {
    for (_, route) in routes {
        let _ = route.tx.send(Err(err.clone()));
    }
}

/// Discard frames still waiting in the write queue; returns how many.
fn drain_queue(queue: &mut mpsc::Receiver<Bytes>) -> usize {
    let mut dropped = 0;
    while queue.try_recv().is_ok() {
        dropped += 1;
    }
    dropped
}
