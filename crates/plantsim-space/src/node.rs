//! Entity descriptions handed in and out of the address space.
//!
//! [`NodeKind`] describes an entity to create. [`Node`] is a point-in-time
//! copy of an entity returned by lookups; holding one never blocks writers
//! and never observes a half-written value.

use core::fmt;

use plantsim_types::{NodeId, Value, ValueType};
use serde::Serialize;

/// Which of the two entity variants a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeClass {
    /// Container used for hierarchy and browsing.
    Object,
    /// Typed, mutable leaf.
    Variable,
}

impl NodeClass {
    /// Lowercase name used in error messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Variable => "variable",
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Description of an entity to create.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind {
    /// A container node.
    Object,
    /// A variable whose declared type is the tag of `initial`.
    Variable {
        /// Starting value.
        initial: Value,
        /// Whether external callers may write the variable.
        writable: bool,
    },
}

impl NodeKind {
    /// A variable that only the simulation may change.
    pub fn read_only(initial: impl Into<Value>) -> Self {
        Self::Variable {
            initial: initial.into(),
            writable: false,
        }
    }

    /// A variable that external callers may write.
    pub fn writable(initial: impl Into<Value>) -> Self {
        Self::Variable {
            initial: initial.into(),
            writable: true,
        }
    }

    /// The class of entity this kind creates.
    pub const fn class(&self) -> NodeClass {
        match self {
            Self::Object => NodeClass::Object,
            Self::Variable { .. } => NodeClass::Variable,
        }
    }
}

/// Snapshot of an object node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectSnapshot {
    /// Identifier of the object.
    pub id: NodeId,
    /// Human-readable name.
    pub display_name: String,
    /// Parent object, `None` only for the root.
    pub parent: Option<NodeId>,
    /// Children in creation order.
    pub children: Vec<NodeId>,
}

/// Snapshot of a variable node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSnapshot {
    /// Identifier of the variable.
    pub id: NodeId,
    /// Human-readable name.
    pub display_name: String,
    /// Owning object.
    pub parent: NodeId,
    /// Value at the moment the snapshot was taken.
    pub value: Value,
    /// Declared type; every stored value carries this tag.
    pub value_type: ValueType,
    /// Whether external callers may write the variable.
    pub writable: bool,
}

/// Point-in-time copy of one entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum Node {
    /// A container node.
    Object(ObjectSnapshot),
    /// A variable node.
    Variable(VariableSnapshot),
}

impl Node {
    /// Identifier of the entity.
    pub const fn id(&self) -> NodeId {
        match self {
            Self::Object(o) => o.id,
            Self::Variable(v) => v.id,
        }
    }

    /// Human-readable name of the entity.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Object(o) => &o.display_name,
            Self::Variable(v) => &v.display_name,
        }
    }

    /// Which variant this is.
    pub const fn class(&self) -> NodeClass {
        match self {
            Self::Object(_) => NodeClass::Object,
            Self::Variable(_) => NodeClass::Variable,
        }
    }

    /// The variable snapshot, if this is a variable.
    pub const fn as_variable(&self) -> Option<&VariableSnapshot> {
        match self {
            Self::Variable(v) => Some(v),
            Self::Object(_) => None,
        }
    }
}

/// One row of a browse listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrowseEntry {
    /// Identifier of the child.
    pub id: NodeId,
    /// Human-readable name of the child.
    pub display_name: String,
    /// Whether the child is an object or a variable.
    pub class: NodeClass,
}
