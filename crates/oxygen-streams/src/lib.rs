//! Streams and services that run on an Oxygen connection.
//!
//! Every type here is a thin layer over [`oxygen_transport::Registry`]:
//! it builds a request, registers a [`Subscriber`](oxygen_transport::Subscriber)
//! with a [`StreamHandler`](oxygen_transport::StreamHandler), and keeps
//! a handle the caller can query.
//!
//! - [`ObjectStream`]: level object replication with delta-compressed updates.
//! - [`EventStream`]: users joining, leaving, and moving their cursor.
//! - [`DownloadStream`] / [`UploadStream`]: the chunked file transfer protocol.
//! - [`AssetService`] / [`BuildService`]: transfers bound to a node and a directory.
//! - [`MetricsReporter`]: answers the server's metric collection requests.
//! - [`PluginService`]: schedules plugins and follows their notifications.
//!
//! Handles share state with their handler through `Arc<Mutex<_>>`. All
//! handler code runs on the task that calls `process`, so the locks are
//! never contended in practice.

mod asset;
mod build;
mod event;
mod metrics;
mod object;
mod plugin;
pub mod transfer;

pub use asset::{ASSET_NODE, AssetService};
pub use build::{BUILD_NODE, BuildService};
pub use event::{EventStream, LevelEvents, User};
pub use metrics::{Counter, Gauge, METRIC_NODE, MetricKind, MetricsReporter, PosMetric};
pub use object::{LEVEL_NODE, ObjectEvents, ObjectRecord, ObjectStream};
pub use plugin::{PLUGIN_NODE, PluginService};
pub use transfer::{
    DownloadStream, TransferCallback, TransferConfig, TransferOutcome, TransferProgress,
    TransferState, UploadStream,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if a previous holder panicked.
///
/// The guarded values are plain bookkeeping (snapshots, user lists,
/// progress) that stay consistent between statements, so a poisoned
/// lock carries no broken invariant.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
