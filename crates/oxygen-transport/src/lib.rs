//! Transport layer for Oxygen.
//!
//! One persistent TCP connection carries every request, reply, and push
//! stream. This crate owns that connection and everything needed to route
//! frames to the right listener:
//!
//! - [`Connection`]: the socket plus reader, writer, and heartbeat tasks.
//! - [`Registry`]: live subscribers keyed by correlation id, and dispatch.
//! - [`Subscriber`] / [`StreamHandler`]: a request and its listeners.
//! - [`ConnectionConfig`]: host, port, heartbeat, frame limit.
//!
//! # Feature Flags
//!
//! - `testing`: [`TestWire`](testing::TestWire), a registry harness with
//!   no socket, for testing stream logic.

mod config;
mod connection;
mod error;
mod registry;
mod stats;
mod subscriber;
#[cfg(feature = "testing")]
pub mod testing;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{StreamError, TransportError};
pub use registry::{FrameSender, Registry};
pub use stats::ConnectionStats;
pub use subscriber::{Callback, Context, StreamHandler, Subscriber, SubscriberId};

use std::fmt;

/// Opaque identifier for a connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
