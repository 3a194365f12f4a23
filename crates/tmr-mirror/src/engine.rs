//! Reconciliation of the mirror against the live object store.
//!
//! A call to [`Reconciler::reconcile`] walks the changed ids that are
//! already mirrored, records their content and diffs their children:
//!
//! - a recorded child missing from the live children is queued for
//!   adoption (it may still turn up under another parent);
//! - a known child under a new name is renamed;
//! - a known child under another parent is moved;
//! - an unknown child is created and its id fed back into the changed set.
//!
//! The loop repeats until no changed id is left in the mirror. Whatever is
//! still queued for adoption at the end was not claimed by any parent and is
//! removed together with its subtree.
//!
//! Before a child takes a name, any other child still recorded under that
//! name is parked under a `__parked_<id>` name, so no two nodes ever share a
//! path, not even in the middle of a swap.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use tmr_store::{LiveObject, ObjectAccessor};
use tmr_types::ObjectId;

use crate::error::MirrorResult;
use crate::path::{prune_subpaths, MirrorPath};
use crate::recorder::{Recorder, WriteOutcome};
use crate::tree::TreeMirror;

/// Name prefix for children moved out of the way of a rename.
pub const PARK_PREFIX: &str = "__parked_";

/// What a reconciliation call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Objects whose content was recorded (written or already up to date).
    pub recorded: usize,
    /// Recorded objects whose persisted content actually changed.
    pub written: usize,
    pub renamed: usize,
    pub moved: usize,
    pub created: usize,
    /// Nodes dropped from the mirror or stray directories deleted.
    pub removed: usize,
    /// Changed ids that never became reachable from the mirror.
    pub unreachable: usize,
}

impl ReconcileReport {
    /// `true` if nothing on disk changed.
    pub fn is_noop(&self) -> bool {
        self.written == 0
            && self.renamed == 0
            && self.moved == 0
            && self.created == 0
            && self.removed == 0
    }

    pub fn merge(&mut self, other: &ReconcileReport) {
        self.recorded += other.recorded;
        self.written += other.written;
        self.renamed += other.renamed;
        self.moved += other.moved;
        self.created += other.created;
        self.removed += other.removed;
        self.unreachable += other.unreachable;
    }
}

impl fmt::Display for ReconcileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} recorded ({} written), {} renamed, {} moved, {} created, {} removed",
            self.recorded, self.written, self.renamed, self.moved, self.created, self.removed
        )
    }
}

/// Per-call working state.
#[derive(Default)]
struct Pass {
    changed: BTreeSet<ObjectId>,
    adoption: BTreeSet<ObjectId>,
    parked: BTreeSet<ObjectId>,
    report: ReconcileReport,
}

/// Applies changes from the live store to a [`TreeMirror`] and its
/// persisted projection.
pub struct Reconciler<'a> {
    mirror: &'a mut TreeMirror,
    accessor: &'a dyn ObjectAccessor,
    recorder: &'a dyn Recorder,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        mirror: &'a mut TreeMirror,
        accessor: &'a dyn ObjectAccessor,
        recorder: &'a dyn Recorder,
    ) -> Self {
        Self {
            mirror,
            accessor,
            recorder,
        }
    }

    /// Bring the mirror up to date with the objects in `changed`.
    ///
    /// Ids that are not (and do not become) part of the mirror are ignored.
    /// On error the mirror and the persisted tree may be partially updated;
    /// every step is safe to repeat.
    pub fn reconcile(&mut self, changed: BTreeSet<ObjectId>) -> MirrorResult<ReconcileReport> {
        let mut pass = Pass {
            changed,
            ..Pass::default()
        };
        if pass.changed.is_empty() {
            return Ok(pass.report);
        }
        tracing::info!(count = pass.changed.len(), "found changed objects");

        loop {
            let batch: Vec<ObjectId> = pass
                .changed
                .iter()
                .filter(|id| self.mirror.contains(id))
                .copied()
                .collect();
            if batch.is_empty() {
                break;
            }
            for id in &batch {
                pass.changed.remove(id);
            }
            for id in batch {
                let object = self.accessor.fetch(&id)?;
                self.record(id, &object, &mut pass.report)?;
                self.update_children(id, &object, &mut pass)?;
            }
        }

        if !pass.changed.is_empty() {
            tracing::debug!(
                count = pass.changed.len(),
                "changed objects not reachable from the mirror"
            );
            pass.report.unreachable = pass.changed.len();
        }

        for id in std::mem::take(&mut pass.parked) {
            let still_parked = self
                .mirror
                .name_of(&id)
                .is_some_and(|name| name.starts_with(PARK_PREFIX));
            if still_parked && pass.adoption.insert(id) {
                tracing::warn!(%id, "parked object was not claimed by any parent");
            }
        }

        self.drain(&mut pass)?;
        Ok(pass.report)
    }

    /// Record `top` and everything below it as the mirror currently has it,
    /// deleting persisted child paths the mirror does not know about.
    ///
    /// Used to populate a fresh mirror and to catch up after a restart.
    pub fn record_subtree(&mut self, top: ObjectId) -> MirrorResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        self.record_subtree_into(top, &mut report)?;
        Ok(report)
    }

    /// Re-record the subtrees of every changed id present in the mirror.
    ///
    /// Subtrees nested inside another changed subtree are recorded once,
    /// through their topmost changed ancestor.
    pub fn catch_up(&mut self, changed: &BTreeSet<ObjectId>) -> MirrorResult<ReconcileReport> {
        let mut by_path: BTreeMap<MirrorPath, ObjectId> = changed
            .iter()
            .filter_map(|id| self.mirror.get(id).map(|node| (node.path.clone(), *id)))
            .collect();
        let mut paths: Vec<MirrorPath> = by_path.keys().cloned().collect();
        prune_subpaths(&mut paths);
        tracing::info!(
            changed = changed.len(),
            subtrees = paths.len(),
            "catching up"
        );

        let mut report = ReconcileReport::default();
        let swept_root = paths.first().is_some_and(MirrorPath::is_root);
        for path in paths {
            if let Some(id) = by_path.remove(&path) {
                self.record_subtree_into(id, &mut report)?;
            }
        }
        // branches parked under the root by an interrupted call
        if !swept_root {
            if let Some(root) = self.mirror.root_id() {
                self.remove_strays(root, &mut report)?;
            }
        }
        Ok(report)
    }

    fn record_subtree_into(&mut self, top: ObjectId, report: &mut ReconcileReport) -> MirrorResult<()> {
        let mut stack = vec![top];
        while let Some(id) = stack.pop() {
            let object = self.accessor.fetch(&id)?;
            self.record(id, &object, report)?;

            self.remove_strays(id, report)?;

            let mut children: Vec<(&String, ObjectId)> = self
                .mirror
                .lookup(&id)?
                .children
                .iter()
                .map(|(child, name)| (name, *child))
                .collect();
            children.sort();
            stack.extend(children.into_iter().rev().map(|(_, child)| child));
        }
        Ok(())
    }

    /// Delete persisted child paths of `id` that the mirror does not list.
    fn remove_strays(&mut self, id: ObjectId, report: &mut ReconcileReport) -> MirrorResult<()> {
        let node = self.mirror.lookup(&id)?;
        let known: HashSet<&str> = node.children.values().map(String::as_str).collect();
        for name in self.recorder.list_children(&node.path)? {
            if !known.contains(name.as_str()) {
                let stray = node.path.child(&name);
                tracing::info!(path = %stray, "removing stray path");
                self.recorder.remove_tree(&stray)?;
                report.removed += 1;
            }
        }
        Ok(())
    }

    fn record(&mut self, id: ObjectId, object: &LiveObject, report: &mut ReconcileReport) -> MirrorResult<()> {
        let path = self.mirror.lookup(&id)?.path.clone();
        let content = self.accessor.content(object)?;
        match self.recorder.write(&path, &content)? {
            WriteOutcome::Written => {
                tracing::info!(%path, %id, "recording");
                report.written += 1;
            }
            WriteOutcome::Unchanged => tracing::debug!(%path, %id, "content unchanged"),
        }
        report.recorded += 1;
        Ok(())
    }

    fn update_children(&mut self, id: ObjectId, object: &LiveObject, pass: &mut Pass) -> MirrorResult<()> {
        let root = self.mirror.root_id();
        let mut live: Vec<(String, ObjectId)> = Vec::new();
        for (name, child) in self.accessor.children(object)? {
            let Some(child_id) = child.id else {
                continue;
            };
            if child_id == id || Some(child_id) == root {
                tracing::warn!(parent = %id, child = %child_id, %name, "ignoring child that points back at itself or the root");
                continue;
            }
            live.push((name, child_id));
        }
        live.sort();

        let mut seen = HashSet::new();
        live.retain(|(name, child)| {
            let first = seen.insert(*child);
            if !first {
                tracing::warn!(parent = %id, %child, %name, "child listed twice, keeping first name");
            }
            first
        });

        let recorded: Vec<ObjectId> = self.mirror.lookup(&id)?.children.keys().copied().collect();
        for child in recorded {
            if !seen.contains(&child) {
                pass.adoption.insert(child);
            }
        }

        for (name, child) in live {
            let current = self.mirror.lookup(&id)?.children.get(&child);
            if current.map(String::as_str) == Some(name.as_str()) {
                continue;
            }
            self.free_name(id, &name, child, pass)?;
            match self.mirror.get(&child).map(|node| node.parent) {
                None => self.create_child(id, child, &name, pass)?,
                Some(parent) if parent == Some(id) => self.rename_child(id, child, &name, pass)?,
                Some(_) => self.move_child(id, child, &name, pass)?,
            }
        }
        Ok(())
    }

    /// Park whichever other child of `parent` is recorded under `name`.
    fn free_name(&mut self, parent: ObjectId, name: &str, claimant: ObjectId, pass: &mut Pass) -> MirrorResult<()> {
        let occupant = self
            .mirror
            .lookup(&parent)?
            .children
            .iter()
            .find(|(child, n)| n.as_str() == name && **child != claimant)
            .map(|(child, _)| *child);
        match occupant {
            Some(occupant) => self.park(occupant, parent, pass),
            None => Ok(()),
        }
    }

    fn park(&mut self, id: ObjectId, under: ObjectId, pass: &mut Pass) -> MirrorResult<()> {
        let name = format!("{PARK_PREFIX}{}", id.to_hex());
        let from = self.mirror.lookup(&id)?.path.clone();
        let to = self.mirror.lookup(&under)?.path.child(&name);
        tracing::debug!(%from, %to, "parking");
        self.recorder.rename(&from, &to)?;
        self.mirror.reparent(id, under, &name)?;
        pass.parked.insert(id);
        Ok(())
    }

    fn rename_child(&mut self, parent: ObjectId, child: ObjectId, name: &str, pass: &mut Pass) -> MirrorResult<()> {
        let from = self.mirror.lookup(&child)?.path.clone();
        let to = self.mirror.lookup(&parent)?.path.child(name);
        tracing::info!(%from, %to, "renaming");
        self.recorder.rename(&from, &to)?;
        self.mirror.set_child_name(parent, child, name)?;
        pass.adoption.remove(&child);
        pass.report.renamed += 1;
        Ok(())
    }

    fn move_child(&mut self, parent: ObjectId, child: ObjectId, name: &str, pass: &mut Pass) -> MirrorResult<()> {
        if let Some(blocker) = self.mirror.child_toward(&child, &parent) {
            // child currently contains its new parent; lift that branch out
            let root = self.mirror.root_id().unwrap_or(ObjectId::ROOT);
            self.park(blocker, root, pass)?;
        }
        let from = self.mirror.lookup(&child)?.path.clone();
        let to = self.mirror.lookup(&parent)?.path.child(name);
        tracing::info!(%from, %to, "moving");
        self.recorder.rename(&from, &to)?;
        self.mirror.reparent(child, parent, name)?;
        pass.adoption.remove(&child);
        pass.report.moved += 1;
        Ok(())
    }

    fn create_child(&mut self, parent: ObjectId, child: ObjectId, name: &str, pass: &mut Pass) -> MirrorResult<()> {
        self.mirror.create_node(child, parent, name)?;
        tracing::debug!(path = %self.mirror.lookup(&child)?.path, id = %child, "new object");
        pass.changed.insert(child);
        pass.report.created += 1;
        Ok(())
    }

    /// Remove every node still queued for adoption, along with everything
    /// below it.
    fn drain(&mut self, pass: &mut Pass) -> MirrorResult<()> {
        let mut doomed = Vec::new();
        while let Some(id) = pass.adoption.pop_first() {
            let Some(node) = self.mirror.remove_node(&id) else {
                continue;
            };
            pass.adoption.extend(node.children.keys().copied());
            doomed.push(node.path);
            pass.report.removed += 1;
        }
        prune_subpaths(&mut doomed);
        for path in doomed {
            tracing::info!(%path, "removing");
            self.recorder.remove_tree(&path)?;
        }
        Ok(())
    }
}
