//! Transport layer: dialing and driving physical connections.
//!
//! Everything above this module (the idle pool and the multiplexer) deals in
//! [`Conn`] values produced by a [`Dialer`]. The default [`NetDialer`] speaks
//! plain TCP, TLS over TCP and connected UDP.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       Pool  /  Multiplexed              │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   Dialer, DialOptions, Conn, probe      │
//! ├─────────────────────────────────────────┤
//! │      TCP  |  TLS (rustls)  |  UDP       │
//! └─────────────────────────────────────────┘
//! ```

mod conn;
mod dial;
#[cfg(feature = "tls")]
mod tls;

pub use conn::Conn;
pub use dial::{CaSource, DialOptions, Dialer, NetDialer, Network, TlsOptions};
pub(crate) use dial::node_key;
