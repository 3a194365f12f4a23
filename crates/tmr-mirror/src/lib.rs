//! Tree mirror and reconciliation engine.
//!
//! [`TreeMirror`] is an arena of [`TreeNode`]s keyed by [`ObjectId`] that
//! mirrors the hierarchy of the object store, with every node's path cached
//! and kept current by explicit propagation. [`Reconciler`] takes a set of
//! changed object ids and brings both the mirror and its on-disk projection
//! (written through a [`Recorder`]) up to date: recording content, renaming,
//! moving, creating and finally removing objects that no parent adopted.
//!
//! # Invariants
//!
//! Between reconciliation calls:
//!
//! 1. Exactly one root node.
//! 2. Every non-root node is listed by its parent under its local name, and
//!    its path is the parent's path plus that name.
//! 3. No cycles; every node is reachable from the root.
//! 4. Paths are unique.
//!
//! [`TreeMirror::check_invariants`] verifies all four.
//!
//! [`ObjectId`]: tmr_types::ObjectId

pub mod engine;
pub mod error;
pub mod fs_recorder;
pub mod memory_recorder;
pub mod path;
pub mod recorder;
pub mod tree;

pub use engine::{ReconcileReport, Reconciler, PARK_PREFIX};
pub use error::{MirrorError, MirrorResult};
pub use fs_recorder::{FsRecorder, CONTENT_FILE};
pub use memory_recorder::{MemoryRecorder, RecorderOp};
pub use path::{prune_subpaths, MirrorPath};
pub use recorder::{Recorder, WriteOutcome};
pub use tree::{TreeMirror, TreeNode};
