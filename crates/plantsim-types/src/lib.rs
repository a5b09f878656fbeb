//! Shared type definitions for the plantsim address space.
//!
//! # Modules
//!
//! - [`ids`] -- [`NodeId`] addresses and [`SessionId`] wrappers
//! - [`value`] -- The [`Value`] tagged union carried by variables

pub mod ids;
pub mod value;

pub use ids::{NodeId, NodeIdParseError, SessionId};
pub use value::{Value, ValueType};
