//! Hierarchical address space for the plantsim server.
//!
//! This crate models the data the server exposes: a tree of objects and
//! typed variables, each addressed by a stable [`NodeId`], plus the fixed
//! factory topology the simulation drives.
//!
//! # Modules
//!
//! - [`address_space`] -- The [`AddressSpace`] registry with per-variable
//!   locking, lookup, browse, and tree walks.
//! - [`error`] -- Error types for address-space operations.
//! - [`node`] -- Creation requests and point-in-time [`Node`] snapshots.
//! - [`topology`] -- The factory layout: sensors, motors, system counters.
//!
//! [`NodeId`]: plantsim_types::NodeId

pub mod address_space;
pub mod error;
pub mod node;
pub mod topology;

pub use address_space::{
    APP_NAMESPACE, AddressSpace, Children, ROOT_ID, ROOT_NAME, TreeEntry, WriteOrigin,
};
pub use error::AddressSpaceError;
pub use node::{BrowseEntry, Node, NodeClass, NodeKind, ObjectSnapshot, VariableSnapshot};
pub use topology::{
    FactoryLayout, FactoryNodes, MAX_MOTORS, MAX_SENSORS, MotorNodes, SensorLayout, build_factory,
};
