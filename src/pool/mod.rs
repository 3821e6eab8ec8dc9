//! Idle connection pool: one physical connection per logical session.
//!
//! A [`Pool`] maps each destination to a [`ConnectionPool`], which keeps
//! idle connections on a LIFO stack so warm connections stay hot, probes
//! them before reuse, and evicts stale ones from a background health loop.
//!
//! ```text
//!   Pool::get(network, address)
//!        │
//!        ▼
//!   ConnectionPool ──► idle head (fast probe) ──► PoolConn
//!        │                                  │
//!        └──► dial (deadline) ──────────────┘
//!
//!   PoolConn::close / drop ──► idle head  (oldest evicted past max_idle)
//! ```

mod config;
mod connection_pool;
mod idle;
mod pool;
mod pool_conn;

pub use config::{PoolConfig, PoolConfigBuilder};
pub use connection_pool::{ConnectionPool, HealthChecker, PoolEntry};
pub use idle::IdleList;
pub use pool::{GetOptions, Pool};
pub use pool_conn::PoolConn;
