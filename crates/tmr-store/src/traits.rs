use tmr_types::{ObjectId, TxnId};

use crate::error::StoreResult;
use crate::object::{ChildTarget, LiveObject};

/// Read access to the live object graph.
///
/// All reads observe one snapshot; a [`SnapshotSource`] decides when that
/// snapshot advances.
pub trait ObjectAccessor {
    /// Resolve an object by id.
    ///
    /// Returns `ObjectNotFound` if no object with this id exists.
    fn fetch(&self, id: &ObjectId) -> StoreResult<LiveObject>;

    /// The root object.
    fn root(&self) -> StoreResult<LiveObject> {
        self.fetch(&ObjectId::ROOT)
    }

    /// Current children of an object as `(name, child)` pairs, in the order
    /// the object lists them. Transient children come back without an id.
    fn children(&self, object: &LiveObject) -> StoreResult<Vec<(String, LiveObject)>> {
        object
            .state
            .children
            .iter()
            .map(|entry| {
                let child = match &entry.target {
                    ChildTarget::Persistent(id) => self.fetch(id)?,
                    ChildTarget::Transient { content } => LiveObject::transient(content.clone()),
                };
                Ok((entry.name.clone(), child))
            })
            .collect()
    }

    /// The opaque payload of an object.
    fn content(&self, object: &LiveObject) -> StoreResult<Vec<u8>> {
        Ok(object.state.content.clone())
    }
}

/// A store whose read snapshot can be advanced.
pub trait SnapshotSource: ObjectAccessor {
    /// Move the read snapshot forward to everything committed so far and
    /// return the visible transaction boundary: the highest transaction id
    /// whose effects are all visible, excluding anything still in flight.
    fn refresh(&mut self) -> StoreResult<TxnId>;

    /// Boundary of the current snapshot without refreshing.
    fn boundary(&self) -> TxnId;
}
