use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tmr_store::{LiveObject, ObjectAccessor};
use tmr_types::ObjectId;

use crate::error::{MirrorError, MirrorResult};
use crate::path::MirrorPath;

/// Interval between progress lines while building from a snapshot.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// One mirrored object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeNode {
    pub id: ObjectId,
    /// `None` only for the root.
    pub parent: Option<ObjectId>,
    /// Children as recorded at the last reconciliation, keyed by id.
    pub children: HashMap<ObjectId, String>,
    /// Cached location; kept current on every rename and move.
    pub path: MirrorPath,
}

/// In-memory mirror of the object hierarchy.
///
/// Nodes live in an arena keyed by id and refer to each other by id only,
/// so moving a subtree is a matter of updating two parent entries and
/// re-deriving cached paths.
#[derive(Debug, Default)]
pub struct TreeMirror {
    nodes: HashMap<ObjectId, TreeNode>,
    root: Option<ObjectId>,
}

impl TreeMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the mirror from a full traversal of the snapshot rooted at
    /// `root`, discarding whatever was held before.
    ///
    /// Children are visited in name order. Objects without an id are not
    /// mirrored. An id reached a second time through another parent is
    /// skipped with a warning; only its first location is kept.
    pub fn initialize_from_snapshot(
        &mut self,
        accessor: &dyn ObjectAccessor,
        root: &LiveObject,
    ) -> MirrorResult<ObjectId> {
        self.build(accessor, root, PROGRESS_INTERVAL)
    }

    fn build(
        &mut self,
        accessor: &dyn ObjectAccessor,
        root: &LiveObject,
        progress_every: Duration,
    ) -> MirrorResult<ObjectId> {
        let root_id = root.id.ok_or(MirrorError::RootWithoutId)?;
        self.nodes.clear();
        self.root = Some(root_id);

        let started = Instant::now();
        let mut last_report = started;
        let mut stack: Vec<(LiveObject, Option<ObjectId>, MirrorPath)> =
            vec![(root.clone(), None, MirrorPath::root())];

        while let Some((object, parent, path)) = stack.pop() {
            let Some(id) = object.id else {
                continue;
            };
            if self.nodes.contains_key(&id) {
                tracing::warn!(%id, %path, "object reachable through more than one parent, keeping first location");
                continue;
            }
            if let Some(parent_id) = parent {
                let name = path.name().unwrap_or_default().to_string();
                if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                    parent_node.children.insert(id, name);
                }
            }

            let mut children = accessor.children(&object)?;
            children.sort_by(|a, b| a.0.cmp(&b.0));
            for (name, child) in children.into_iter().rev() {
                if child.id.is_some() {
                    stack.push((child, Some(id), path.child(&name)));
                }
            }

            if last_report.elapsed() >= progress_every {
                last_report = Instant::now();
                tracing::info!(objects = self.nodes.len() + 1, %path, "building tree");
            }

            self.nodes.insert(
                id,
                TreeNode {
                    id,
                    parent,
                    children: HashMap::new(),
                    path,
                },
            );
        }

        tracing::info!(
            objects = self.nodes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tree built"
        );
        Ok(root_id)
    }

    pub fn root_id(&self) -> Option<ObjectId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &ObjectId) -> Option<&TreeNode> {
        self.nodes.get(id)
    }

    /// Like [`get`](Self::get), but a missing node is an error.
    pub fn lookup(&self, id: &ObjectId) -> MirrorResult<&TreeNode> {
        self.nodes.get(id).ok_or(MirrorError::NodeNotFound(*id))
    }

    fn lookup_mut(&mut self, id: &ObjectId) -> MirrorResult<&mut TreeNode> {
        self.nodes.get_mut(id).ok_or(MirrorError::NodeNotFound(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.values()
    }

    /// Name of `id` as recorded in its parent; `None` for the root or an
    /// unknown id.
    pub fn name_of(&self, id: &ObjectId) -> Option<&str> {
        let node = self.nodes.get(id)?;
        let parent = self.nodes.get(&node.parent?)?;
        parent.children.get(id).map(String::as_str)
    }

    /// Set the cached path of `id` and re-derive the paths of its whole
    /// subtree from the recorded child names.
    pub fn update_path(&mut self, id: ObjectId, new_path: MirrorPath) -> MirrorResult<()> {
        let mut pending = vec![(id, new_path)];
        while let Some((id, path)) = pending.pop() {
            let node = self.lookup_mut(&id)?;
            for (child, name) in &node.children {
                pending.push((*child, path.child(name)));
            }
            node.path = path;
        }
        Ok(())
    }

    /// Add a fresh node named `name` under `parent`.
    pub fn create_node(&mut self, id: ObjectId, parent: ObjectId, name: &str) -> MirrorResult<()> {
        let parent_node = self.lookup_mut(&parent)?;
        parent_node.children.insert(id, name.to_string());
        let path = parent_node.path.child(name);
        self.nodes.insert(
            id,
            TreeNode {
                id,
                parent: Some(parent),
                children: HashMap::new(),
                path,
            },
        );
        Ok(())
    }

    /// Change the name `parent` records for `child`, keeping it in place.
    pub fn set_child_name(&mut self, parent: ObjectId, child: ObjectId, name: &str) -> MirrorResult<()> {
        let parent_node = self.lookup_mut(&parent)?;
        parent_node.children.insert(child, name.to_string());
        let path = parent_node.path.child(name);
        self.update_path(child, path)
    }

    /// Detach `child` from its current parent and attach it to
    /// `new_parent` under `name`.
    pub fn reparent(&mut self, child: ObjectId, new_parent: ObjectId, name: &str) -> MirrorResult<()> {
        let old_parent = self.lookup(&child)?.parent;
        if let Some(old) = old_parent {
            if let Some(node) = self.nodes.get_mut(&old) {
                node.children.remove(&child);
            }
        }
        let parent_node = self.lookup_mut(&new_parent)?;
        parent_node.children.insert(child, name.to_string());
        let path = parent_node.path.child(name);
        self.lookup_mut(&child)?.parent = Some(new_parent);
        self.update_path(child, path)
    }

    /// Drop a single node, unlinking it from its parent. Its children stay
    /// in the arena; callers drain them separately.
    pub fn remove_node(&mut self, id: &ObjectId) -> Option<TreeNode> {
        if Some(*id) == self.root {
            return None;
        }
        let node = self.nodes.remove(id)?;
        if let Some(parent) = node.parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.remove(id);
            }
        }
        Some(node)
    }

    /// The child of `ancestor` on the parent chain of `id`, or `None` if
    /// `ancestor` is not a proper ancestor of `id`.
    pub fn child_toward(&self, ancestor: &ObjectId, id: &ObjectId) -> Option<ObjectId> {
        let mut current = *id;
        for _ in 0..self.nodes.len() {
            let parent = self.nodes.get(&current)?.parent?;
            if parent == *ancestor {
                return Some(current);
            }
            current = parent;
        }
        None
    }

    /// Check the structural invariants of the mirror.
    pub fn check_invariants(&self) -> Result<(), String> {
        let root = self.root.ok_or("mirror has no root")?;
        let root_node = self.nodes.get(&root).ok_or("root node missing")?;
        if root_node.parent.is_some() || !root_node.path.is_root() {
            return Err(format!("root {root} has a parent or a non-root path"));
        }

        for node in self.nodes.values() {
            if node.id == root {
                continue;
            }
            let parent_id = node
                .parent
                .ok_or_else(|| format!("non-root node {} has no parent", node.id))?;
            let parent = self
                .nodes
                .get(&parent_id)
                .ok_or_else(|| format!("parent {parent_id} of {} missing", node.id))?;
            let name = parent
                .children
                .get(&node.id)
                .ok_or_else(|| format!("{} not listed by its parent {parent_id}", node.id))?;
            if node.path != parent.path.child(name) {
                return Err(format!("{} has stale path {}", node.id, node.path));
            }
            for child in node.children.keys() {
                let listed = self.nodes.get(child).and_then(|c| c.parent);
                if listed != Some(node.id) {
                    return Err(format!("{} lists {child} which does not point back", node.id));
                }
            }
        }

        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                return Err(format!("{id} reached twice"));
            }
            if let Some(node) = self.nodes.get(&id) {
                stack.extend(node.children.keys().copied());
            }
        }
        if seen.len() != self.nodes.len() {
            return Err(format!(
                "{} of {} nodes reachable from root",
                seen.len(),
                self.nodes.len()
            ));
        }

        let mut paths = HashSet::new();
        for node in self.nodes.values() {
            if !paths.insert(&node.path) {
                return Err(format!("path {} used twice", node.path));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmr_store::{InMemoryStore, ObjectState};

    fn oid(n: u64) -> ObjectId {
        ObjectId::from_u64(n)
    }

    fn sample_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .put(
                ObjectId::ROOT,
                ObjectState::new(b"root".to_vec())
                    .with_child("b", oid(2))
                    .with_child("a", oid(1))
                    .with_transient("computed", b"x".to_vec()),
            )
            .unwrap();
        store
            .put(oid(1), ObjectState::new(b"a".to_vec()).with_child("c", oid(3)))
            .unwrap();
        store.put(oid(2), ObjectState::new(b"b".to_vec())).unwrap();
        store.put(oid(3), ObjectState::new(b"c".to_vec())).unwrap();
        store
    }

    fn build(store: &InMemoryStore) -> TreeMirror {
        let mut mirror = TreeMirror::new();
        let root = store.root().unwrap();
        mirror.initialize_from_snapshot(store, &root).unwrap();
        mirror
    }

    /// Log sink shared between a test and its subscriber.
    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn progress_lines_name_the_path_being_visited() {
        let store = sample_store();
        let captured = Captured::default();
        let sink = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::INFO)
            .with_writer(move || sink.clone())
            .finish();

        let mut mirror = TreeMirror::new();
        tracing::subscriber::with_default(subscriber, || {
            let root = store.root().unwrap();
            mirror.build(&store, &root, Duration::ZERO).unwrap();
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("building tree"), "{output}");
        assert!(output.contains("path=/a/c/"), "{output}");
    }

    #[test]
    fn snapshot_builds_paths_and_skips_transients() {
        let store = sample_store();
        let mirror = build(&store);

        assert_eq!(mirror.len(), 4);
        assert_eq!(mirror.root_id(), Some(ObjectId::ROOT));
        assert_eq!(mirror.lookup(&oid(3)).unwrap().path.to_string(), "/a/c/");
        assert_eq!(mirror.name_of(&oid(2)), Some("b"));
        assert_eq!(mirror.name_of(&ObjectId::ROOT), None);
        mirror.check_invariants().unwrap();
    }

    #[test]
    fn duplicate_id_keeps_first_location() {
        let store = sample_store();
        // oid(3) is also listed under b; "a" sorts first so /a/c/ wins
        store
            .put(oid(2), ObjectState::new(b"b".to_vec()).with_child("again", oid(3)))
            .unwrap();
        let mirror = build(&store);

        assert_eq!(mirror.lookup(&oid(3)).unwrap().path.to_string(), "/a/c/");
        assert!(mirror.lookup(&oid(2)).unwrap().children.is_empty());
        mirror.check_invariants().unwrap();
    }

    #[test]
    fn root_without_id_is_rejected() {
        let store = InMemoryStore::new();
        let transient = LiveObject::transient(Vec::new());
        let mut mirror = TreeMirror::new();
        assert!(matches!(
            mirror.initialize_from_snapshot(&store, &transient),
            Err(MirrorError::RootWithoutId)
        ));
    }

    #[test]
    fn update_path_propagates_to_descendants() {
        let store = sample_store();
        let mut mirror = build(&store);

        mirror.set_child_name(ObjectId::ROOT, oid(1), "renamed").unwrap();
        assert_eq!(mirror.lookup(&oid(1)).unwrap().path.to_string(), "/renamed/");
        assert_eq!(mirror.lookup(&oid(3)).unwrap().path.to_string(), "/renamed/c/");
        mirror.check_invariants().unwrap();
    }

    #[test]
    fn reparent_moves_subtree() {
        let store = sample_store();
        let mut mirror = build(&store);

        mirror.reparent(oid(1), oid(2), "inner").unwrap();
        assert_eq!(mirror.lookup(&oid(3)).unwrap().path.to_string(), "/b/inner/c/");
        assert!(!mirror.lookup(&ObjectId::ROOT).unwrap().children.contains_key(&oid(1)));
        assert_eq!(mirror.child_toward(&oid(2), &oid(3)), Some(oid(1)));
        assert_eq!(mirror.child_toward(&ObjectId::ROOT, &oid(3)), Some(oid(2)));
        assert_eq!(mirror.child_toward(&oid(3), &oid(2)), None);
        mirror.check_invariants().unwrap();
    }

    #[test]
    fn remove_node_unlinks_from_parent_but_never_the_root() {
        let store = sample_store();
        let mut mirror = build(&store);

        assert!(mirror.remove_node(&ObjectId::ROOT).is_none());
        let removed = mirror.remove_node(&oid(2)).unwrap();
        assert_eq!(removed.path.to_string(), "/b/");
        assert!(!mirror.contains(&oid(2)));
        mirror.check_invariants().unwrap();
    }

    #[test]
    fn invariant_check_catches_stale_paths() {
        let store = sample_store();
        let mut mirror = build(&store);
        if let Some(node) = mirror.nodes.get_mut(&oid(3)) {
            node.path = MirrorPath::parse("/elsewhere/");
        }
        assert!(mirror.check_invariants().is_err());
    }
}
