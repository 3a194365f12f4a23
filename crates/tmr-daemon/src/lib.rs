//! The sync daemon.
//!
//! [`SyncDaemon`] ties the pieces together: it reads the visible boundary
//! from a [`SnapshotSource`](tmr_store::SnapshotSource), asks the log which
//! objects changed since the durable marker, hands them to the
//! reconciliation engine and advances the marker only after the engine
//! succeeded. [`SyncDaemon::run`] repeats this on an interval until a
//! shutdown request arrives, never interrupting a cycle in progress.

pub mod config;
pub mod daemon;
pub mod error;
pub mod marker;
pub mod shutdown;

pub use config::DaemonConfig;
pub use daemon::{CycleKind, CycleReport, SyncDaemon};
pub use error::{DaemonError, DaemonResult};
pub use marker::{FileMarkerStore, InMemoryMarkerStore, MarkerStore};
pub use shutdown::{listen_for_signals, shutdown_channel};
