//! # Oxygen
//!
//! Client library for the Oxygen collaborative level-editing server.
//!
//! A client holds one TCP connection. Requests, replies, and server push
//! streams (level objects, user presence, file transfers, metric
//! collection, plugin notifications) all share it, each correlated by the
//! id of the request that opened it. Nothing runs in the background
//! except socket I/O: the application calls [`Client::process`] (once
//! per frame in a game loop, or in a loop of its own) and callbacks fire
//! inside that call.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oxygen::prelude::*;
//!
//! # async fn run() -> Result<(), OxygenError> {
//! oxygen::logging::try_init().ok();
//! let mut client = Client::connect(&ClientConfig::new("127.0.0.1")).await?;
//! client.login("ada", "secret", |result| {
//!     if let Err(error) = result {
//!         eprintln!("login failed: {error}");
//!     }
//! })?;
//! let objects = client.open_object_stream(())?;
//! loop {
//!     client.process(true).await?;
//!     println!("{} objects", objects.len());
//! }
//! # }
//! ```
//!
//! ## Crates
//!
//! - `oxygen-protocol`: frames and wire constants.
//! - `oxygen-delta`: the delta codec for object updates.
//! - `oxygen-transport`: the connection, its workers, and dispatch.
//! - `oxygen-streams`: object, event, transfer, metric, and plugin streams.

mod auth;
mod client;
mod config;
mod error;
pub mod logging;

pub use auth::{PasswordHasher, Sha256Hasher};
pub use client::{Client, LOGIN_NODE};
pub use config::ClientConfig;
pub use error::OxygenError;

pub use oxygen_delta as delta;
pub use oxygen_protocol as protocol;
pub use oxygen_streams as streams;
pub use oxygen_transport as transport;

/// The types most applications need.
pub mod prelude {
    pub use crate::{Client, ClientConfig, OxygenError, PasswordHasher, Sha256Hasher};
    pub use oxygen_protocol::{ApplicationError, Message};
    pub use oxygen_streams::{
        AssetService, BuildService, EventStream, LevelEvents, MetricsReporter, ObjectEvents,
        ObjectRecord, ObjectStream, PluginService, TransferOutcome, TransferProgress,
        TransferState, User,
    };
    pub use oxygen_transport::{
        Connection, ConnectionConfig, StreamError, Subscriber, SubscriberId, TransportError,
    };
}
