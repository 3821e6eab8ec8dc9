//! Multiplexed virtual connections over a few physical connections.
//!
//! [`Multiplexed`] keeps `connect_number` physical connections per
//! destination and hands out one [`VirtualConnection`] per request. Writes go
//! through a bounded queue drained by the connection's writer; responses are
//! routed back by request id.
//!
//! ```text
//!   Multiplexed::get(network, address, msg)
//!        │
//!        ▼
//!   destination ──► [conn 0] [conn 1] ... (round robin)
//!                      │
//!                      ▼
//!   VirtualConnection::write ──► queue ──► writer ──► socket
//!   VirtualConnection::read  ◄── route[request_id] ◄── reader
//! ```
//!
//! A stream connection that fails fails every request in flight on it and
//! redials with backoff; once the reconnect budget is spent the destination
//! is dropped. A malformed datagram is discarded and reading goes on.

mod backoff;
mod config;
mod connection;
mod multiplexed;
mod virtual_conn;

pub use backoff::Backoff;
pub use config::{MultiplexedConfig, MultiplexedConfigBuilder};
pub use connection::ConnectionPhase;
pub use multiplexed::{Multiplexed, MuxGetOptions};
pub use virtual_conn::VirtualConnection;
