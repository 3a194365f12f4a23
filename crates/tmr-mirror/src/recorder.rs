use crate::error::MirrorResult;
use crate::path::MirrorPath;

/// Result of a content write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New bytes were persisted.
    Written,
    /// The persisted content already matched; nothing was touched.
    Unchanged,
}

/// Persists the mirror as a tree of paths.
///
/// Implementations must be idempotent: repeating an operation that already
/// took effect succeeds without further change. Removing a path that does
/// not exist is a success.
pub trait Recorder {
    /// Persist the content of the object at `path`, creating the path and
    /// its ancestors as needed.
    fn write(&self, path: &MirrorPath, content: &[u8]) -> MirrorResult<WriteOutcome>;

    /// Delete `path` and everything beneath it.
    fn remove_tree(&self, path: &MirrorPath) -> MirrorResult<()>;

    /// Move the persisted subtree at `from` to `to`, replacing anything
    /// stale at `to`.
    fn rename(&self, from: &MirrorPath, to: &MirrorPath) -> MirrorResult<()>;

    /// Names of the child paths persisted directly beneath `path`.
    fn list_children(&self, path: &MirrorPath) -> MirrorResult<Vec<String>>;
}
