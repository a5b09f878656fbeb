//! Identifier types for the address space and its consumers.
//!
//! [`NodeId`] addresses one entity in the address space as a
//! `(namespace, local)` pair and is rendered in the familiar
//! `ns=<namespace>;i=<local>` text form. Identifiers never change once
//! assigned.
//!
//! Sessions get a UUID v7 (time-ordered) [`SessionId`] so log lines from
//! concurrent consumers can be told apart.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id! {
    /// Unique identifier for a client session.
    SessionId
}

/// Errors produced when parsing a [`NodeId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeIdParseError {
    /// The text does not have the `ns=<n>;i=<id>` shape.
    #[error("malformed node id {text:?}: expected ns=<namespace>;i=<local>")]
    Malformed {
        /// The rejected input.
        text: String,
    },

    /// One of the numeric components does not fit its integer type.
    #[error("node id {text:?} has an out-of-range component: {source}")]
    OutOfRange {
        /// The rejected input.
        text: String,
        /// The underlying integer parse error.
        source: core::num::ParseIntError,
    },
}

/// Stable address of one entity in the address space.
///
/// Ordered by namespace, then local id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeId {
    namespace: u16,
    local: u32,
}

impl NodeId {
    /// Build an identifier from its parts.
    pub const fn new(namespace: u16, local: u32) -> Self {
        Self { namespace, local }
    }

    /// Namespace index.
    pub const fn namespace(self) -> u16 {
        self.namespace
    }

    /// Local index within the namespace.
    pub const fn local(self) -> u32 {
        self.local
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};i={}", self.namespace, self.local)
    }
}

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || NodeIdParseError::Malformed { text: s.to_owned() };
        let out_of_range = |source| NodeIdParseError::OutOfRange {
            text: s.to_owned(),
            source,
        };

        let (ns_part, local_part) = s.trim().split_once(';').ok_or_else(malformed)?;
        let ns_digits = ns_part.strip_prefix("ns=").ok_or_else(malformed)?;
        let local_digits = local_part.strip_prefix("i=").ok_or_else(malformed)?;

        if ns_digits.is_empty()
            || local_digits.is_empty()
            || !ns_digits.bytes().all(|b| b.is_ascii_digit())
            || !local_digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(malformed());
        }

        let namespace = ns_digits.parse::<u16>().map_err(out_of_range)?;
        let local = local_digits.parse::<u32>().map_err(out_of_range)?;
        Ok(Self { namespace, local })
    }
}

impl TryFrom<String> for NodeId {
    type Error = NodeIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeId> for String {
    fn from(id: NodeId) -> Self {
        id.to_string()
    }
}
