//! Live object access for the tree mirror.
//!
//! The mirror reads the current state of the object store through the
//! [`ObjectAccessor`] trait. Two backends are provided:
//!
//! - [`LogStore`] -- reads object states straight from the transaction log,
//!   keeping an incrementally refreshed index of the latest record per
//!   object
//! - [`InMemoryStore`] -- `HashMap`-based store for tests and embedding
//!
//! Objects are never deleted from a store, only unlinked from their
//! parents. An object that is unreachable from the root still resolves by
//! id, which is what lets the mirror resurrect whole subtrees.

pub mod error;
pub mod log_store;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use log_store::{commit_states, create_log, LogStore};
pub use memory::InMemoryStore;
pub use object::{validate_name, ChildEntry, ChildTarget, LiveObject, ObjectState};
pub use traits::{ObjectAccessor, SnapshotSource};
