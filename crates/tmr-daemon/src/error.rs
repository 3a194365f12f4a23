use std::io;
use std::path::PathBuf;

/// Errors raised by the daemon.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// The persisted marker exists but does not hold a transaction id.
    #[error("marker {} is corrupt: {reason}", path.display())]
    MarkerCorrupt { path: PathBuf, reason: String },

    /// Reading or writing the marker failed.
    #[error("marker {}: {source}", path.display())]
    MarkerIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// A cycle was requested before [`SyncDaemon::start`](crate::SyncDaemon::start).
    #[error("daemon has not been started")]
    NotStarted,

    #[error("marker store lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Log(#[from] tmr_log::LogError),

    #[error(transparent)]
    Store(#[from] tmr_store::StoreError),

    #[error(transparent)]
    Mirror(#[from] tmr_mirror::MirrorError),
}

/// Convenience alias for daemon results.
pub type DaemonResult<T> = Result<T, DaemonError>;
