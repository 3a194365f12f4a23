use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{MirrorError, MirrorResult};
use crate::path::MirrorPath;
use crate::recorder::{Recorder, WriteOutcome};

/// An effective operation performed on a [`MemoryRecorder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecorderOp {
    Write(MirrorPath),
    Rename(MirrorPath, MirrorPath),
    Remove(MirrorPath),
}

#[derive(Debug, Default)]
struct Inner {
    /// Every persisted path; `None` for a path with no content of its own.
    entries: BTreeMap<MirrorPath, Option<Vec<u8>>>,
    ops: Vec<RecorderOp>,
}

impl Inner {
    fn ensure_ancestors(&mut self, path: &MirrorPath) {
        let mut current = path.parent();
        while let Some(p) = current {
            if p.is_root() {
                break;
            }
            current = p.parent();
            self.entries.entry(p).or_insert(None);
        }
    }

    fn subtree(&self, path: &MirrorPath) -> Vec<MirrorPath> {
        self.entries
            .range(path.clone()..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(p, _)| p.clone())
            .collect()
    }
}

/// In-memory recorder for tests.
///
/// Models a directory tree: writing a path creates its ancestors, and
/// renames and removals act on whole subtrees. Every operation that changed
/// something is logged and can be inspected with [`ops`](Self::ops).
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    inner: Mutex<Inner>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MirrorResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| MirrorError::Poisoned)
    }

    /// Content persisted at `path`.
    pub fn content(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.lock().ok()?;
        inner.entries.get(&MirrorPath::parse(path)).cloned().flatten()
    }

    /// Every persisted path in display form, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.lock()
            .map(|inner| inner.entries.keys().map(ToString::to_string).collect())
            .unwrap_or_default()
    }

    /// Operations performed so far.
    pub fn ops(&self) -> Vec<RecorderOp> {
        self.lock().map(|inner| inner.ops.clone()).unwrap_or_default()
    }

    /// Return and clear the operation log.
    pub fn take_ops(&self) -> Vec<RecorderOp> {
        self.lock()
            .map(|mut inner| std::mem::take(&mut inner.ops))
            .unwrap_or_default()
    }
}

impl Recorder for MemoryRecorder {
    fn write(&self, path: &MirrorPath, content: &[u8]) -> MirrorResult<WriteOutcome> {
        let mut inner = self.lock()?;
        if let Some(Some(existing)) = inner.entries.get(path) {
            if existing.as_slice() == content {
                return Ok(WriteOutcome::Unchanged);
            }
        }
        inner.ensure_ancestors(path);
        inner.entries.insert(path.clone(), Some(content.to_vec()));
        inner.ops.push(RecorderOp::Write(path.clone()));
        Ok(WriteOutcome::Written)
    }

    fn remove_tree(&self, path: &MirrorPath) -> MirrorResult<()> {
        let mut inner = self.lock()?;
        let doomed = inner.subtree(path);
        if doomed.is_empty() {
            return Ok(());
        }
        for p in doomed {
            inner.entries.remove(&p);
        }
        inner.ops.push(RecorderOp::Remove(path.clone()));
        Ok(())
    }

    fn rename(&self, from: &MirrorPath, to: &MirrorPath) -> MirrorResult<()> {
        let mut inner = self.lock()?;
        let moving = inner.subtree(from);
        if moving.is_empty() {
            return Ok(());
        }
        for stale in inner.subtree(to) {
            inner.entries.remove(&stale);
        }
        let depth = from.depth();
        let mut moved = Vec::with_capacity(moving.len());
        for p in moving {
            if let Some(value) = inner.entries.remove(&p) {
                let mut components = to.components().to_vec();
                components.extend_from_slice(&p.components()[depth..]);
                moved.push((MirrorPath::from_components(components), value));
            }
        }
        inner.entries.extend(moved);
        inner.ensure_ancestors(to);
        inner.ops.push(RecorderOp::Rename(from.clone(), to.clone()));
        Ok(())
    }

    fn list_children(&self, path: &MirrorPath) -> MirrorResult<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .subtree(path)
            .into_iter()
            .filter(|p| p.depth() == path.depth() + 1)
            .filter_map(|p| p.name().map(str::to_string))
            .collect())
    }
}
