//! # connmux
//!
//! Client-side connection management for RPC transports.
//!
//! connmux offers two ways to reuse physical connections:
//!
//! - **Pooling** ([`pool`]): one physical connection per logical session.
//!   Idle connections are kept per destination, probed before reuse, and
//!   evicted by a background health check.
//! - **Multiplexing** ([`multiplexed`]): many concurrent requests share a few
//!   physical connections per destination, correlated by request id.
//!
//! Both dial through the [`transport`] layer (TCP, TLS over TCP, UDP) and
//! stay protocol-agnostic: the caller plugs its framing in through
//! [`core::FramerBuilder`].
//!
//! ## Feature Flags
//!
//! - `pool` (default): Idle connection pool
//! - `multiplexed` (default): Multiplexed virtual connections
//! - `tls` (default): TLS dialing with rustls
//!
//! ## Modules
//!
//! - [`core`]: Framing traits, constants, and error types (always included)
//! - [`transport`]: Dialer and physical connections (always included)
//! - [`pool`]: Connection pool (requires `pool` feature)
//! - [`multiplexed`]: Multiplexer (requires `multiplexed` feature)
//! - [`stats`]: Counters exposed by both (always included)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::{Bytes, BytesMut};
//! use connmux::prelude::*;
//!
//! struct Codec;
//!
//! impl FramerBuilder for Codec {
//!     fn build(&self) -> Box<dyn Framer> {
//!         Box::new(Codec)
//!     }
//! }
//!
//! impl Framer for Codec {
//!     fn read_frame(&mut self, src: &mut BytesMut) -> std::io::Result<Option<Bytes>> {
//!         Ok(self.decode(src)?.map(ResponseFrame::into_payload))
//!     }
//!
//!     fn as_decoder(&mut self) -> Option<&mut dyn Decoder> {
//!         Some(self)
//!     }
//! }
//!
//! impl Decoder for Codec {
//!     fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<ResponseFrame>> {
//!         if src.len() < 4 {
//!             return Ok(None);
//!         }
//!         let id = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
//!         Ok(Some(ResponseFrame::new(id, src.split().freeze())))
//!     }
//! }
//!
//! # async fn run() -> Result<(), MuxError> {
//! let mux = Multiplexed::new(MultiplexedConfig::default());
//! let opts = MuxGetOptions::new()
//!     .framer_builder(Arc::new(Codec))
//!     .request_id(7)
//!     .deadline(tokio::time::Instant::now() + Duration::from_secs(1));
//!
//! let mut vc = mux.get("tcp", "127.0.0.1:8000", opts).await?;
//! vc.write(Bytes::from_static(&[0, 0, 0, 7])).await?;
//! let response = vc.read().await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer (always included)
pub mod transport;

// Idle connection pool (feature-gated)
#[cfg(feature = "pool")]
#[cfg_attr(docsrs, doc(cfg(feature = "pool")))]
pub mod pool;

// Multiplexed virtual connections (feature-gated)
#[cfg(feature = "multiplexed")]
#[cfg_attr(docsrs, doc(cfg(feature = "multiplexed")))]
pub mod multiplexed;

pub mod stats;

#[cfg(test)]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::transport::{CaSource, Conn, DialOptions, Dialer, NetDialer, Network, TlsOptions};

    pub use crate::stats::{MuxStats, PoolStats};

    #[cfg(feature = "pool")]
    pub use crate::pool::{ConnectionPool, GetOptions, Pool, PoolConfig, PoolConfigBuilder, PoolConn};

    #[cfg(feature = "multiplexed")]
    pub use crate::multiplexed::{
        ConnectionPhase, Multiplexed, MultiplexedConfig, MultiplexedConfigBuilder, MuxGetOptions,
        VirtualConnection,
    };
}

// Re-export commonly used items at crate root
pub use core::{Decoder, Framer, FramerBuilder, Msg, MuxError, PoolError, ResponseFrame, TransportError};

#[cfg(feature = "pool")]
pub use pool::{Pool, PoolConfig, PoolConn};

#[cfg(feature = "multiplexed")]
pub use multiplexed::{Multiplexed, MultiplexedConfig, VirtualConnection};
