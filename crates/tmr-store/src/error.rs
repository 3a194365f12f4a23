use tmr_types::ObjectId;

/// Errors from live object access.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No object with this id exists in the current snapshot.
    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// A child name that cannot be mirrored.
    #[error("invalid child name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Two children of one object share a name.
    #[error("duplicate child name {name:?} in object {parent}")]
    DuplicateName { parent: ObjectId, name: String },

    /// Object state could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Underlying transaction log failure.
    #[error("log error: {0}")]
    Log(#[from] tmr_log::LogError),

    /// A lock guarding store state was poisoned.
    #[error("store lock poisoned")]
    Poisoned,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
