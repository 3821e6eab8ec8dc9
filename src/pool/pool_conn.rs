//! Connection checked out of a [`ConnectionPool`](super::ConnectionPool).

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::OwnedSemaphorePermit;
use tracing::trace;

use super::connection_pool::{PoolEntry, PoolInner};
use crate::core::{PoolError, detach};

/// Bytes requested from the socket per read when a frame is incomplete.
const READ_CHUNK: usize = 4096;

/// A pooled connection.
///
/// Closing (or dropping) it returns the connection to the idle list unless
/// the pool is closed or the connection was force-closed. Any read, write
/// or framing error force-closes it, so a broken connection is never
/// reused.
pub struct PoolConn {
    entry: Option<PoolEntry>,
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
    force_close: bool,
}

impl PoolConn {
    pub(super) fn new(entry: PoolEntry, pool: Arc<PoolInner>, permit: Option<OwnedSemaphorePermit>) -> Self {
        let force_close = pool.force_close();
        Self {
            entry: Some(entry),
            pool,
            permit,
            force_close,
        }
    }

    /// Read the next frame using the pool's framer.
    ///
    /// Fails with [`PoolError::FramerNotSet`] if the pool has no framer
    /// builder. Frames are copied out of the read buffer unless the framer
    /// declares itself safe.
    pub async fn read_frame(&mut self) -> Result<Bytes, PoolError> {
        let entry = self.entry.as_mut().ok_or(PoolError::ConnClosed)?;
        let Some(framer) = entry.framer.as_mut() else {
            self.release(true);
            return Err(PoolError::FramerNotSet);
        };

        let res = loop {
            match framer.read_frame(&mut entry.read_buf) {
                Ok(Some(frame)) => break Ok(detach(frame, framer.is_safe())),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
            entry.read_buf.reserve(READ_CHUNK);
            match entry.conn.read_buf(&mut entry.read_buf).await {
                Ok(0) => {
                    break Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed before a full frame",
                    ));
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            }
        };

        res.map_err(|e| {
            trace!(address = %self.pool.address(), error = %e, "read frame failed");
            self.release(true);
            PoolError::Io(e)
        })
    }

    /// Write the whole buffer.
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), PoolError> {
        let entry = self.entry.as_mut().ok_or(PoolError::ConnClosed)?;
        if let Err(e) = entry.conn.write_all(buf).await {
            self.release(true);
            return Err(PoolError::Io(e));
        }
        Ok(())
    }

    /// Read raw bytes, draining anything the framer buffered first.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PoolError> {
        let entry = self.entry.as_mut().ok_or(PoolError::ConnClosed)?;
        if !entry.read_buf.is_empty() {
            let n = buf.len().min(entry.read_buf.len());
            entry.read_buf.copy_to_slice(&mut buf[..n]);
            return Ok(n);
        }
        match entry.conn.read(buf).await {
            Ok(0) if !buf.is_empty() => {
                self.release(true);
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) => {
                self.release(true);
                Err(PoolError::Io(e))
            }
        }
    }

    /// Return the connection to the pool.
    ///
    /// A second call fails with [`PoolError::ConnClosed`].
    pub fn close(&mut self) -> Result<(), PoolError> {
        if self.entry.is_none() {
            return Err(PoolError::ConnClosed);
        }
        self.release(self.force_close);
        Ok(())
    }

    /// Close the underlying connection instead of pooling it on release.
    pub fn set_force_close(&mut self, force: bool) {
        self.force_close = force;
    }

    /// Whether the connection has been released.
    pub fn is_closed(&self) -> bool {
        self.entry.is_none()
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> Result<SocketAddr, PoolError> {
        let entry = self.entry.as_ref().ok_or(PoolError::ConnClosed)?;
        Ok(entry.conn().peer_addr()?)
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> Result<SocketAddr, PoolError> {
        let entry = self.entry.as_ref().ok_or(PoolError::ConnClosed)?;
        Ok(entry.conn().local_addr()?)
    }

    fn release(&mut self, force: bool) {
        if let Some(entry) = self.entry.take() {
            self.pool.put(entry, force);
        }
        // After `put` so a waiter woken by the permit finds the idle entry.
        self.permit.take();
    }

    fn poll_entry(&mut self) -> io::Result<&mut PoolEntry> {
        self.entry
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, PoolError::ConnClosed))
    }
}

impl Drop for PoolConn {
    fn drop(&mut self) {
        self.release(self.force_close);
    }
}

impl fmt::Debug for PoolConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConn")
            .field("entry", &self.entry)
            .field("force_close", &self.force_close)
            .finish()
    }
}

impl AsyncRead for PoolConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let entry = this.poll_entry()?;
        if !entry.read_buf.is_empty() {
            let n = buf.remaining().min(entry.read_buf.len());
            buf.put_slice(&entry.read_buf[..n]);
            entry.read_buf.advance(n);
            return Poll::Ready(Ok(()));
        }
        let res = Pin::new(&mut entry.conn).poll_read(cx, buf);
        if let Poll::Ready(Err(_)) = &res {
            this.release(true);
        }
        res
    }
}

impl AsyncWrite for PoolConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.poll_entry()?.conn).poll_write(cx, buf);
        if let Poll::Ready(Err(_)) = &res {
            this.release(true);
        }
        res
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.poll_entry()?.conn).poll_flush(cx);
        if let Poll::Ready(Err(_)) = &res {
            this.release(true);
        }
        res
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let res = Pin::new(&mut this.poll_entry()?.conn).poll_shutdown(cx);
        // A shut-down stream cannot be reused.
        if res.is_ready() {
            this.release(true);
        }
        res
    }
}
