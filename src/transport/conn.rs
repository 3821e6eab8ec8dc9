//! Physical connection handle returned by a [`Dialer`](super::Dialer).
//!
//! A [`Conn`] is a plain TCP stream, a TLS stream over TCP, or a connected
//! UDP socket. It implements `AsyncRead`/`AsyncWrite` for all three so the
//! pool and the multiplexer can drive it without caring which one it is.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpStream, UdpSocket};

/// A dialed physical connection.
pub enum Conn {
    /// Plain TCP stream.
    Tcp(TcpStream),
    /// TLS client stream over TCP.
    #[cfg(feature = "tls")]
    #[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// UDP socket connected to its peer.
    Udp(UdpSocket),
}

impl Conn {
    /// Whether this is a byte stream (TCP or TLS) rather than a datagram socket.
    pub fn is_stream(&self) -> bool {
        !matches!(self, Conn::Udp(_))
    }

    /// Remote address of the connection.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Conn::Tcp(s) => s.peer_addr(),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => s.get_ref().0.peer_addr(),
            Conn::Udp(s) => s.peer_addr(),
        }
    }

    /// Local address of the connection.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Conn::Tcp(s) => s.local_addr(),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => s.get_ref().0.local_addr(),
            Conn::Udp(s) => s.local_addr(),
        }
    }

    /// Zero-wait liveness probe of an idle connection.
    ///
    /// Tries to read one byte without waiting. "Would block" means the
    /// connection is idle and healthy. A clean EOF means the peer closed it
    /// (`UnexpectedEof`); any byte read means the peer sent data nobody asked
    /// for (`InvalidData`). Either way the connection must not be reused.
    ///
    /// TLS streams are not probed: bytes on the socket belong to the record
    /// layer (session tickets, alerts) and reading them raw would corrupt it.
    pub fn probe(&self) -> io::Result<()> {
        let mut buf = [0u8; 1];
        let res = match self {
            Conn::Tcp(s) => s.try_read(&mut buf),
            #[cfg(feature = "tls")]
            Conn::Tls(_) => return Ok(()),
            Conn::Udp(s) => s.try_recv(&mut buf),
        };
        match res {
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
            Ok(0) if self.is_stream() => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Ok(_) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unexpected read from socket",
            )),
        }
    }

    /// Get the UDP socket, if this is a datagram connection.
    pub fn into_udp(self) -> Result<UdpSocket, Conn> {
        match self {
            Conn::Udp(s) => Ok(s),
            other => Err(other),
        }
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Conn::Tcp(_) => "tcp",
            #[cfg(feature = "tls")]
            Conn::Tls(_) => "tls",
            Conn::Udp(_) => "udp",
        };
        f.debug_struct("Conn")
            .field("kind", &kind)
            .field("peer", &self.peer_addr().ok())
            .finish()
    }
}

impl AsyncRead for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s).poll_read(cx, buf),
            Conn::Udp(s) => s.poll_recv(cx, buf),
        }
    }
}

impl AsyncWrite for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s).poll_write(cx, buf),
            Conn::Udp(s) => s.poll_send(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s).poll_flush(cx),
            Conn::Udp(_) => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Conn::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Conn::Tls(s) => Pin::new(s).poll_shutdown(cx),
            Conn::Udp(_) => Poll::Ready(Ok(())),
        }
    }
}
