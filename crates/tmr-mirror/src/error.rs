//! Error types for the mirror crate.

use std::io;

use tmr_types::ObjectId;

/// Errors raised while maintaining the mirror.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    /// The recorder could not write, rename or delete part of the persisted
    /// tree.
    #[error("failed to {op} {path}: {source}")]
    PersistFailure {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    /// A path component that cannot be used on disk.
    #[error("invalid path component {0:?}")]
    InvalidComponent(String),

    /// An id expected to be in the mirror is not.
    #[error("node not found in mirror: {0}")]
    NodeNotFound(ObjectId),

    /// The snapshot root has no stable id and cannot be mirrored.
    #[error("root object has no id")]
    RootWithoutId,

    /// Live object access failed.
    #[error("store error: {0}")]
    Store(#[from] tmr_store::StoreError),

    /// A lock guarding recorder state was poisoned.
    #[error("recorder lock poisoned")]
    Poisoned,
}

impl MirrorError {
    pub(crate) fn persist(op: &'static str, path: impl std::fmt::Display, source: io::Error) -> Self {
        Self::PersistFailure {
            op,
            path: path.to_string(),
            source,
        }
    }
}

/// Convenience alias for mirror results.
pub type MirrorResult<T> = Result<T, MirrorError>;
