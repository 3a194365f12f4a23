use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tmr_types::ObjectId;

use crate::error::{StoreError, StoreResult};

/// What a child entry points at.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildTarget {
    /// A persistent object with its own id.
    Persistent(ObjectId),
    /// A computed child without an id. Invisible to the mirror.
    Transient { content: Vec<u8> },
}

/// One named child of an object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildEntry {
    pub name: String,
    pub target: ChildTarget,
}

/// The stored state of one object: its own payload plus its named
/// children, in the order the object lists them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectState {
    pub content: Vec<u8>,
    pub children: Vec<ChildEntry>,
}

impl ObjectState {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        Self {
            content: content.into(),
            children: Vec::new(),
        }
    }

    /// Append a persistent child.
    pub fn with_child(mut self, name: impl Into<String>, id: ObjectId) -> Self {
        self.children.push(ChildEntry {
            name: name.into(),
            target: ChildTarget::Persistent(id),
        });
        self
    }

    /// Append a transient child.
    pub fn with_transient(mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.children.push(ChildEntry {
            name: name.into(),
            target: ChildTarget::Transient {
                content: content.into(),
            },
        });
        self
    }

    /// Check every child name and reject duplicates.
    pub fn validate(&self, id: ObjectId) -> StoreResult<()> {
        let mut seen = HashSet::new();
        for child in &self.children {
            validate_name(&child.name)?;
            if !seen.insert(child.name.as_str()) {
                return Err(StoreError::DuplicateName {
                    parent: id,
                    name: child.name.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> StoreResult<Self> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

/// An object as seen in the current snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveObject {
    /// `None` for transient objects.
    pub id: Option<ObjectId>,
    pub state: ObjectState,
}

impl LiveObject {
    pub fn persistent(id: ObjectId, state: ObjectState) -> Self {
        Self {
            id: Some(id),
            state,
        }
    }

    pub fn transient(content: Vec<u8>) -> Self {
        Self {
            id: None,
            state: ObjectState::new(content),
        }
    }
}

/// Validate a child name.
///
/// Names become single path components of the mirror, so they may not be
/// empty, contain `/` or NUL, or be `.`/`..`. A leading `_` is reserved for
/// files the recorder keeps next to mirrored objects.
pub fn validate_name(name: &str) -> StoreResult<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name == "." || name == ".." {
        "name is a relative path component"
    } else if name.contains('/') || name.contains('\0') {
        "name contains '/' or NUL"
    } else if name.starts_with('_') {
        "names starting with '_' are reserved"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidName {
        name: name.to_string(),
        reason,
    })
}
