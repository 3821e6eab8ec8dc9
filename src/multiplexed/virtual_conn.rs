//! Per-request handle over a shared physical connection.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::connection::{Connection, Delivery};
use crate::core::{Msg, MuxError};

/// A virtual connection: one request and its response.
///
/// [`write`](Self::write) queues the request frame on the physical
/// connection; [`read`](Self::read) waits for the response carrying the same
/// request id, for the connection to fail, or for the deadline. Dropping the
/// handle deregisters it, so a late response is discarded.
pub struct VirtualConnection {
    conn: Arc<Connection>,
    request_id: u32,
    token: u64,
    msg: Arc<dyn Msg>,
    rx: Option<oneshot::Receiver<Delivery>>,
    deadline: Option<Instant>,
}

impl VirtualConnection {
    pub(crate) fn new(conn: Arc<Connection>, msg: Arc<dyn Msg>, deadline: Option<Instant>) -> Self {
        let request_id = msg.request_id();
        let (token, rx) = conn.register(Arc::clone(&msg));
        Self {
            conn,
            request_id,
            token,
            msg,
            rx: Some(rx),
            deadline,
        }
    }

    /// Queue a request frame.
    ///
    /// Under the drop-on-full policy a full queue fails at once with
    /// [`MuxError::QueueFull`]; otherwise this waits for room until the
    /// deadline. On failure the request is deregistered.
    pub async fn write(&self, frame: Bytes) -> Result<(), MuxError> {
        let res = self.conn.send(frame, self.deadline).await;
        if res.is_err() {
            self.conn.remove(self.request_id, self.token);
        }
        res
    }

    /// Wait for the response.
    ///
    /// Returns the response bytes, the shared error of a failed connection,
    /// [`MuxError::ChanClosed`] if another request took over this request
    /// id, or [`MuxError::Timeout`] once the deadline passes.
    pub async fn read(&mut self) -> Result<Bytes, MuxError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(MuxError::ChanClosed);
        };
        let delivered = match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    res = rx => res,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.conn.remove(self.request_id, self.token);
                        return Err(MuxError::Timeout);
                    }
                }
            }
            None => rx.await,
        };
        // A oneshot receiver must not be polled again once it completed.
        self.rx = None;
        match delivered {
            Ok(res) => res,
            Err(_) => Err(MuxError::ChanClosed),
        }
    }

    /// Request id this handle is registered under.
    pub fn request_id(&self) -> u32 {
        self.request_id
    }

    /// The message this request was registered with.
    pub fn msg(&self) -> &Arc<dyn Msg> {
        &self.msg
    }

    /// Deadline applied to writes and reads.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Peer address of the physical connection, once connected.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr()
    }
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        self.conn.remove(self.request_id, self.token);
    }
}

impl fmt::Debug for VirtualConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualConnection")
            .field("request_id", &self.request_id)
            .field("remote_addr", &self.remote_addr())
            .field("deadline", &self.deadline)
            .finish()
    }
}
