//! The address space: a tree of objects and variables keyed by [`NodeId`].
//!
//! Structure (which nodes exist and who owns whom) is built through
//! `&mut self` methods and is therefore frozen once the space is shared
//! behind an [`Arc`](std::sync::Arc). Only variable values change
//! afterwards, and each value sits behind its own lock.
//!
//! # Consistency
//!
//! Every value write is a single atomic replace, so a reader never sees a
//! value mid-update. Nothing serializes reads *across* variables: reading
//! two variables back to back may observe them from two different
//! simulation ticks.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use plantsim_types::{NodeId, Value, ValueType};

use crate::error::AddressSpaceError;
use crate::node::{BrowseEntry, Node, NodeClass, NodeKind, ObjectSnapshot, VariableSnapshot};

/// Well-known identifier of the root object.
pub const ROOT_ID: NodeId = NodeId::new(0, 85);

/// Display name of the root object.
pub const ROOT_NAME: &str = "Objects";

/// Namespace that [`AddressSpace::create`] allocates identifiers in.
pub const APP_NAMESPACE: u16 = 2;

/// Who is performing a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// The simulation itself; may write read-only variables.
    Simulation,
    /// A session or other outside caller; bound by the writable flag.
    External,
}

#[derive(Debug)]
struct ObjectEntry {
    display_name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug)]
struct VariableEntry {
    display_name: String,
    parent: NodeId,
    value_type: ValueType,
    writable: bool,
    value: RwLock<Value>,
}

#[derive(Debug)]
enum Entry {
    Object(ObjectEntry),
    Variable(VariableEntry),
}

/// One node in a depth-first walk of the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Distance from the node the walk started at (which has depth 0).
    pub depth: usize,
    /// The visited node.
    pub entry: BrowseEntry,
}

/// Iterator over the children of one node, in creation order.
///
/// Clones are independent cursors. Calling [`AddressSpace::children`]
/// again starts over from the first child.
#[derive(Debug, Clone)]
pub struct Children<'a> {
    inner: core::slice::Iter<'a, NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().copied()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Children<'_> {}

/// Hierarchical registry of objects and variables.
#[derive(Debug)]
pub struct AddressSpace {
    entries: BTreeMap<NodeId, Entry>,
    /// Next local id to try per namespace. Only ever moves forward, so an
    /// identifier is never handed out twice.
    next_local: BTreeMap<u16, u32>,
}

impl AddressSpace {
    /// Create a space holding only the root object.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            ROOT_ID,
            Entry::Object(ObjectEntry {
                display_name: ROOT_NAME.to_owned(),
                parent: None,
                children: Vec::new(),
            }),
        );
        Self {
            entries,
            next_local: BTreeMap::new(),
        }
    }

    /// Identifier of the root object.
    pub const fn root(&self) -> NodeId {
        ROOT_ID
    }

    /// Number of entities, root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always `false`: the root exists from construction.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether an entity is registered under `id`.
    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    // -------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------

    /// Add an entity under `parent`, allocating the next free identifier in
    /// [`APP_NAMESPACE`].
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::NotFound`] if `parent` does not exist,
    /// [`AddressSpaceError::InvalidKind`] if `parent` is a variable, or
    /// [`AddressSpaceError::NamespaceExhausted`] if no identifier is left.
    pub fn create(
        &mut self,
        parent: NodeId,
        kind: NodeKind,
        display_name: &str,
    ) -> Result<NodeId, AddressSpaceError> {
        self.check_parent(parent, kind)?;
        let id = self.allocate(APP_NAMESPACE)?;
        self.insert(id, parent, kind, display_name);
        Ok(id)
    }

    /// Add an entity under `parent` with a caller-chosen identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::DuplicateId`] if `id` is taken, plus the
    /// parent errors of [`create`](Self::create).
    pub fn create_with_id(
        &mut self,
        id: NodeId,
        parent: NodeId,
        kind: NodeKind,
        display_name: &str,
    ) -> Result<NodeId, AddressSpaceError> {
        if self.entries.contains_key(&id) {
            return Err(AddressSpaceError::DuplicateId(id));
        }
        self.check_parent(parent, kind)?;

        let next = self.next_local.entry(id.namespace()).or_insert(1);
        if id.local() >= *next {
            *next = id.local().saturating_add(1);
        }

        self.insert(id, parent, kind, display_name);
        Ok(id)
    }

    fn check_parent(&self, parent: NodeId, kind: NodeKind) -> Result<(), AddressSpaceError> {
        match self.entries.get(&parent) {
            None => Err(AddressSpaceError::NotFound(parent)),
            Some(Entry::Variable(_)) => Err(AddressSpaceError::InvalidKind {
                parent,
                kind: kind.class().as_str(),
            }),
            Some(Entry::Object(_)) => Ok(()),
        }
    }

    fn allocate(&mut self, namespace: u16) -> Result<NodeId, AddressSpaceError> {
        let mut local = self.next_local.get(&namespace).copied().unwrap_or(1);
        while self.entries.contains_key(&NodeId::new(namespace, local)) {
            local = local
                .checked_add(1)
                .ok_or(AddressSpaceError::NamespaceExhausted(namespace))?;
        }
        self.next_local.insert(namespace, local.saturating_add(1));
        Ok(NodeId::new(namespace, local))
    }

    fn insert(&mut self, id: NodeId, parent: NodeId, kind: NodeKind, display_name: &str) {
        let entry = match kind {
            NodeKind::Object => Entry::Object(ObjectEntry {
                display_name: display_name.to_owned(),
                parent: Some(parent),
                children: Vec::new(),
            }),
            NodeKind::Variable { initial, writable } => Entry::Variable(VariableEntry {
                display_name: display_name.to_owned(),
                parent,
                value_type: initial.value_type(),
                writable,
                value: RwLock::new(initial),
            }),
        };
        self.entries.insert(id, entry);
        if let Some(Entry::Object(object)) = self.entries.get_mut(&parent) {
            object.children.push(id);
        }
    }

    // -------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------

    /// Copy the current state of an entity.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::NotFound`] for an unknown identifier.
    pub fn get(&self, id: NodeId) -> Result<Node, AddressSpaceError> {
        let node = match self.entry(id)? {
            Entry::Object(object) => Node::Object(ObjectSnapshot {
                id,
                display_name: object.display_name.clone(),
                parent: object.parent,
                children: object.children.clone(),
            }),
            Entry::Variable(variable) => Node::Variable(VariableSnapshot {
                id,
                display_name: variable.display_name.clone(),
                parent: variable.parent,
                value: *variable.value.read(),
                value_type: variable.value_type,
                writable: variable.writable,
            }),
        };
        Ok(node)
    }

    /// Read a variable's current value.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::NotFound`] for an unknown identifier or
    /// [`AddressSpaceError::NotAVariable`] if `id` is an object.
    pub fn value(&self, id: NodeId) -> Result<Value, AddressSpaceError> {
        let variable = self.variable(id)?;
        let value = *variable.value.read();
        Ok(value)
    }

    /// Replace a variable's value atomically.
    ///
    /// The value is stored exactly as given.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::NotFound`],
    /// [`AddressSpaceError::NotAVariable`],
    /// [`AddressSpaceError::NotWritable`] for an external write to a
    /// read-only variable, or [`AddressSpaceError::TypeMismatch`] when the
    /// value's tag differs from the declared type.
    pub fn set_value(
        &self,
        id: NodeId,
        value: Value,
        origin: WriteOrigin,
    ) -> Result<(), AddressSpaceError> {
        let variable = self.variable(id)?;
        if origin == WriteOrigin::External && !variable.writable {
            return Err(AddressSpaceError::NotWritable(id));
        }
        if value.value_type() != variable.value_type {
            return Err(AddressSpaceError::TypeMismatch {
                id,
                expected: variable.value_type,
                actual: value.value_type(),
            });
        }
        *variable.value.write() = value;
        Ok(())
    }

    /// Iterate the children of `id` in creation order. Variables have none.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::NotFound`] for an unknown identifier.
    pub fn children(&self, id: NodeId) -> Result<Children<'_>, AddressSpaceError> {
        let slice: &[NodeId] = match self.entry(id)? {
            Entry::Object(object) => &object.children,
            Entry::Variable(_) => &[],
        };
        Ok(Children {
            inner: slice.iter(),
        })
    }

    /// List the children of `id` with their names and classes.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::NotFound`] for an unknown identifier.
    pub fn browse(&self, id: NodeId) -> Result<Vec<BrowseEntry>, AddressSpaceError> {
        self.children(id)?
            .map(|child| self.browse_entry(child))
            .collect()
    }

    /// Walk the subtree rooted at `id` depth-first, parents before children.
    ///
    /// # Errors
    ///
    /// Returns [`AddressSpaceError::NotFound`] for an unknown identifier.
    pub fn walk(&self, id: NodeId) -> Result<Vec<TreeEntry>, AddressSpaceError> {
        let mut visited = Vec::new();
        let mut stack = vec![(id, 0_usize)];
        while let Some((current, depth)) = stack.pop() {
            visited.push(TreeEntry {
                depth,
                entry: self.browse_entry(current)?,
            });
            let child_depth = depth.saturating_add(1);
            let children: Vec<NodeId> = self.children(current)?.collect();
            stack.extend(children.into_iter().rev().map(|child| (child, child_depth)));
        }
        Ok(visited)
    }

    /// Find the first entity (in identifier order) with the given name.
    pub fn find(&self, display_name: &str) -> Option<NodeId> {
        self.entries.iter().find_map(|(id, entry)| {
            let name = match entry {
                Entry::Object(object) => &object.display_name,
                Entry::Variable(variable) => &variable.display_name,
            };
            (name == display_name).then_some(*id)
        })
    }

    fn browse_entry(&self, id: NodeId) -> Result<BrowseEntry, AddressSpaceError> {
        let (display_name, class) = match self.entry(id)? {
            Entry::Object(object) => (object.display_name.clone(), NodeClass::Object),
            Entry::Variable(variable) => (variable.display_name.clone(), NodeClass::Variable),
        };
        Ok(BrowseEntry {
            id,
            display_name,
            class,
        })
    }

    fn entry(&self, id: NodeId) -> Result<&Entry, AddressSpaceError> {
        self.entries.get(&id).ok_or(AddressSpaceError::NotFound(id))
    }

    fn variable(&self, id: NodeId) -> Result<&VariableEntry, AddressSpaceError> {
        match self.entry(id)? {
            Entry::Variable(variable) => Ok(variable),
            Entry::Object(_) => Err(AddressSpaceError::NotAVariable(id)),
        }
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}
