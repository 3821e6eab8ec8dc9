//! Core types shared by the pool and the multiplexer.
//!
//! This module has no I/O of its own: it holds the default tunables, the
//! error taxonomy, and the codec boundary that callers plug their protocol
//! framing into.

mod constants;
mod error;
mod traits;

pub use constants::*;
pub use error::*;
pub use traits::*;
