//! Error types for the `plantsim-space` crate.
//!
//! All fallible address-space operations return [`AddressSpaceError`].

use plantsim_types::{NodeId, ValueType};

/// Errors that can occur during address-space operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressSpaceError {
    /// No entity is registered under the identifier.
    #[error("node not found: {0}")]
    NotFound(NodeId),

    /// The requested kind of entity cannot be placed under this parent.
    #[error("cannot create a {kind} under {parent}: parent is a variable")]
    InvalidKind {
        /// The rejected parent.
        parent: NodeId,
        /// Kind of entity that was requested.
        kind: &'static str,
    },

    /// An external caller tried to write a read-only variable.
    #[error("variable {0} is not writable")]
    NotWritable(NodeId),

    /// The value's tag disagrees with the variable's declared type.
    #[error("type mismatch on {id}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The variable being written.
        id: NodeId,
        /// Declared type of the variable.
        expected: ValueType,
        /// Type of the rejected value.
        actual: ValueType,
    },

    /// The identifier names an object where a variable was required.
    #[error("node {0} is not a variable")]
    NotAVariable(NodeId),

    /// The identifier is already taken.
    #[error("duplicate node id: {0}")]
    DuplicateId(NodeId),

    /// The local id space of a namespace is used up.
    #[error("namespace {0} has no free local ids left")]
    NamespaceExhausted(u16),

    /// A topology layout asks for more entities than its id range holds.
    #[error("layout has {requested} {group}, at most {max} fit the id range")]
    LayoutTooLarge {
        /// Which group overflowed (e.g. "sensors").
        group: &'static str,
        /// How many entries were requested.
        requested: usize,
        /// The maximum that fits.
        max: usize,
    },
}
