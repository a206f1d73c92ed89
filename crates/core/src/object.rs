//! Persistent object as seen by the store
//!
//! The store only needs an object's id and, when it creates one, a parent
//! link. Methods, globals and inheritance lookup belong to the object model
//! above this layer; the parent list is kept here because `make_object`
//! seeds it.

use serde::{Deserialize, Serialize};

use crate::types::ObjectId;

/// A persistent object
///
/// Every object except the root (id 0) is expected to have at least one
/// parent; that rule and acyclicity of the parent graph are left to the
/// caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    id: ObjectId,
    parents: Vec<ObjectId>,
}

impl Object {
    /// Create an object with no parents
    pub fn new(id: ObjectId) -> Self {
        Self {
            id,
            parents: Vec::new(),
        }
    }

    /// Create an object with a single parent link
    pub fn with_parent(id: ObjectId, parent: ObjectId) -> Self {
        Self {
            id,
            parents: vec![parent],
        }
    }

    /// The object's id
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Parent ids in insertion order
    pub fn parents(&self) -> &[ObjectId] {
        &self.parents
    }

    /// Add a parent link (no-op if already present)
    pub fn add_parent(&mut self, parent: ObjectId) {
        if !self.parents.contains(&parent) {
            self.parents.push(parent);
        }
    }

    /// Remove a parent link, returning whether it was present
    pub fn remove_parent(&mut self, parent: ObjectId) -> bool {
        let before = self.parents.len();
        self.parents.retain(|p| *p != parent);
        self.parents.len() != before
    }
}
