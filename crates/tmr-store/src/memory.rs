//! In-memory object store for tests and embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use tmr_types::{ObjectId, TxnId};

use crate::error::{StoreError, StoreResult};
use crate::object::{LiveObject, ObjectState};
use crate::traits::{ObjectAccessor, SnapshotSource};

/// `HashMap`-backed [`SnapshotSource`].
///
/// Every `put` is immediately visible. The boundary reported by
/// [`SnapshotSource::refresh`] is whatever was last set with
/// [`InMemoryStore::set_boundary`].
pub struct InMemoryStore {
    objects: RwLock<HashMap<ObjectId, ObjectState>>,
    boundary: RwLock<TxnId>,
}

impl InMemoryStore {
    /// A store holding only an empty root object.
    pub fn new() -> Self {
        let mut objects = HashMap::new();
        objects.insert(ObjectId::ROOT, ObjectState::default());
        Self {
            objects: RwLock::new(objects),
            boundary: RwLock::new(TxnId::ZERO),
        }
    }

    /// Insert or replace an object state.
    pub fn put(&self, id: ObjectId, state: ObjectState) -> StoreResult<()> {
        state.validate(id)?;
        self.objects
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(id, state);
        Ok(())
    }

    /// The current state of an object, if present.
    pub fn get(&self, id: &ObjectId) -> Option<ObjectState> {
        self.objects.read().ok()?.get(id).cloned()
    }

    pub fn set_boundary(&self, tid: TxnId) {
        if let Ok(mut boundary) = self.boundary.write() {
            *boundary = tid;
        }
    }

    /// Number of objects, reachable or not.
    pub fn len(&self) -> usize {
        self.objects.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectAccessor for InMemoryStore {
    fn fetch(&self, id: &ObjectId) -> StoreResult<LiveObject> {
        let objects = self.objects.read().map_err(|_| StoreError::Poisoned)?;
        objects
            .get(id)
            .map(|state| LiveObject::persistent(*id, state.clone()))
            .ok_or(StoreError::ObjectNotFound(*id))
    }
}

impl SnapshotSource for InMemoryStore {
    fn refresh(&mut self) -> StoreResult<TxnId> {
        Ok(SnapshotSource::boundary(self))
    }

    fn boundary(&self) -> TxnId {
        self.boundary.read().map(|b| *b).unwrap_or(TxnId::ZERO)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("object_count", &self.len())
            .finish()
    }
}
