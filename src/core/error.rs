//! Error types for connmux.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while opening a physical connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The dial did not complete in time.
    #[error("dial timed out after {0:?}")]
    Timeout(Duration),

    /// The address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The network name is not one of tcp/tcp4/tcp6/udp/udp4/udp6.
    #[error("network not supported: {0}")]
    UnsupportedNetwork(String),

    /// Loading certificates or building the TLS client failed.
    #[error("tls error: {0}")]
    Tls(String),

    /// TLS was requested but the crate was built without the `tls` feature.
    #[error("tls requested but the `tls` feature is disabled")]
    TlsUnavailable,
}

/// Errors returned by the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was closed.
    #[error("connection pool closed")]
    Closed,

    /// `max_active` reached and the pool is configured not to wait.
    #[error("connection pool limit")]
    Limit,

    /// The pooled connection was already closed or released.
    #[error("conn closed")]
    ConnClosed,

    /// A new connection was needed but no dial deadline was available.
    #[error("dial no deadline")]
    NoDeadline,

    /// `read_frame` was called on a connection without a framer.
    #[error("framer not set")]
    FramerNotSet,

    /// The caller's deadline passed while waiting for a connection.
    #[error("deadline exceeded")]
    Timeout,

    /// Dialing a new connection failed.
    #[error("dial failed: {0}")]
    Dial(#[from] TransportError),

    /// I/O on a pooled connection failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by the multiplexer and its virtual connections.
///
/// Cloneable so one connection failure can be handed to every reader waiting
/// on that connection.
#[derive(Debug, Clone, Error)]
pub enum MuxError {
    /// No framer builder was supplied in the get options.
    #[error("framer builder is nil")]
    FramerBuilderNil,

    /// The framer built for the connection does not implement [`Decoder`](crate::core::Decoder).
    #[error("framer does not implement the decoder interface")]
    DecoderNil,

    /// No message carrying a request id was supplied in the get options.
    #[error("msg is nil")]
    MsgNil,

    /// The network name is neither a stream nor a datagram network.
    #[error("network not supported: {0}")]
    NetworkNotSupported(String),

    /// The write queue is full and the drop-on-full policy is enabled.
    #[error("connection queue is full")]
    QueueFull,

    /// The response slot was closed without a response, e.g. because another
    /// virtual connection registered the same request id.
    #[error("unexpected recv chan close")]
    ChanClosed,

    /// The caller's deadline passed before the operation completed.
    #[error("deadline exceeded")]
    Timeout,

    /// The multiplexer or its connection group was shut down.
    #[error("multiplexed connection closed")]
    Closed,

    /// The physical connection failed; every reader on it sees the same error.
    #[error("connection failed: {0}")]
    Connection(Arc<TransportError>),
}

impl MuxError {
    /// Whether the error is a caller/programming error that retrying cannot fix.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            MuxError::FramerBuilderNil
                | MuxError::DecoderNil
                | MuxError::MsgNil
                | MuxError::NetworkNotSupported(_)
        )
    }
}

/// Result type alias for dialing.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors() {
        assert!(MuxError::FramerBuilderNil.is_config_error());
        assert!(MuxError::NetworkNotSupported("unix".into()).is_config_error());
        assert!(!MuxError::QueueFull.is_config_error());
        assert!(!MuxError::Timeout.is_config_error());
    }

    #[test]
    fn test_shared_connection_error_display() {
        let err = Arc::new(TransportError::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "bad frame",
        )));
        let a = MuxError::Connection(Arc::clone(&err));
        let b = MuxError::Connection(err);
        assert_eq!(a.to_string(), b.to_string());
        assert!(a.to_string().contains("bad frame"));
    }
}
