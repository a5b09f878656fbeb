//! Client sessions: one external consumer's read/write window onto a running
//! server's address space.
//!
//! A session never keeps the address space alive. Once the session is
//! closed, or the server it was opened against stops, every operation
//! returns [`SessionError::Closed`].
//!
//! # Consistency
//!
//! Each variable read returns a value that some writer stored whole.
//! [`Session::read_group`] reads its identifiers one after another; a tick
//! may land between two of them, so a group is not a single-instant
//! snapshot.
//!
//! Writes to a motor speed race the engine: if a tick reads the speed
//! before the write and stores its drifted value after, the write is lost.
//! Callers that need a specific speed should stop the motor first. Motor
//! speeds are non-negative; a session write of a negative speed is refused.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use plantsim_space::{
    AddressSpace, AddressSpaceError, BrowseEntry, Node, TreeEntry, WriteOrigin,
};
use plantsim_types::{NodeId, SessionId, Value};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::lifecycle::ServerLifecycle;

/// Where and as whom a session connects.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Endpoint URL the server must be serving.
    pub endpoint: String,
    /// Username presented to the server.
    pub username: Option<String>,
    /// Password presented to the server.
    pub password: Option<String>,
}

impl EndpointConfig {
    /// Anonymous connection to `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: None,
            password: None,
        }
    }

    /// Attach credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// The endpoint and credentials a server is configured with.
    pub fn from_server(server: &ServerConfig) -> Self {
        Self {
            endpoint: server.endpoint.clone(),
            username: server.username.clone(),
            password: server.password.clone(),
        }
    }
}

// Keeps the password out of logs.
impl core::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Errors that can occur when opening a session. All are retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The server has not been started, or has been stopped.
    #[error("server is not running")]
    ServerNotRunning,

    /// The server serves a different endpoint.
    #[error("endpoint {requested} is not served (server is at {served})")]
    EndpointMismatch {
        /// Endpoint the caller asked for.
        requested: String,
        /// Endpoint the server serves.
        served: String,
    },

    /// The credentials did not match the server's.
    #[error("authentication failed for user {}", .username.as_deref().unwrap_or("<anonymous>"))]
    AuthenticationFailed {
        /// Username the caller presented.
        username: Option<String>,
    },
}

/// A batch read in which some identifiers failed.
///
/// Carries every value that was read alongside the reason each failed
/// identifier was not.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{} reads failed, {} succeeded", .failures.len(), .values.len())]
pub struct PartialReadError {
    /// Values that were read.
    pub values: BTreeMap<NodeId, Value>,
    /// Why each remaining identifier could not be read.
    pub failures: BTreeMap<NodeId, AddressSpaceError>,
}

/// Errors returned by session operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// The session was closed or its server stopped.
    #[error("session is closed")]
    Closed,

    /// A single read or browse failed.
    #[error("read of {id} failed: {source}")]
    ReadFailed {
        /// The identifier that was read.
        id: NodeId,
        /// The underlying address-space error.
        source: AddressSpaceError,
    },

    /// A batch read succeeded only in part.
    #[error(transparent)]
    PartialRead(#[from] PartialReadError),

    /// A write was refused.
    #[error("write to {id} rejected: {source}")]
    WriteRejected {
        /// The identifier that was written.
        id: NodeId,
        /// Why the write was refused.
        source: AddressSpaceError,
    },

    /// A negative value was written to a motor speed.
    #[error("motor speed {id} cannot be negative (got {value})")]
    NegativeSpeed {
        /// The speed variable.
        id: NodeId,
        /// The refused value.
        value: i64,
    },
}

/// One consumer's interaction window with a running server.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    space: Weak<AddressSpace>,
    serving: Arc<AtomicBool>,
    closed: AtomicBool,
    /// Motor speed variables, which only accept non-negative integers.
    speeds: Vec<NodeId>,
}

impl Session {
    /// Open a session against a running server.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::ServerNotRunning`] if the server is
    /// stopped, [`ConnectionError::EndpointMismatch`] if `endpoint` names a
    /// different endpoint, or [`ConnectionError::AuthenticationFailed`] if
    /// the server requires credentials and these do not match.
    pub fn open(
        server: &ServerLifecycle,
        endpoint: &EndpointConfig,
    ) -> Result<Self, ConnectionError> {
        let (space, serving) = server
            .connection()
            .ok_or(ConnectionError::ServerNotRunning)?;

        let expected = &server.config().server;
        if endpoint.endpoint != expected.endpoint {
            warn!(
                requested = %endpoint.endpoint,
                served = %expected.endpoint,
                "Session refused: endpoint mismatch"
            );
            return Err(ConnectionError::EndpointMismatch {
                requested: endpoint.endpoint.clone(),
                served: expected.endpoint.clone(),
            });
        }

        if expected.username.is_some()
            && (endpoint.username != expected.username || endpoint.password != expected.password)
        {
            warn!(username = ?endpoint.username, "Session refused: authentication failed");
            return Err(ConnectionError::AuthenticationFailed {
                username: endpoint.username.clone(),
            });
        }

        let speeds = server.nodes().map_or_else(Vec::new, |nodes| {
            nodes.motors.iter().map(|motor| motor.speed).collect()
        });
        let session = Self {
            id: SessionId::new(),
            space,
            serving,
            closed: AtomicBool::new(false),
            speeds,
        };
        info!(session_id = %session.id, endpoint = %endpoint.endpoint, "Session opened");
        Ok(session)
    }

    /// Identifier of this session, for log correlation.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Whether operations can still succeed.
    pub fn is_open(&self) -> bool {
        self.space().is_ok()
    }

    fn space(&self) -> Result<Arc<AddressSpace>, SessionError> {
        if self.closed.load(Ordering::Acquire) || !self.serving.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        self.space.upgrade().ok_or(SessionError::Closed)
    }

    /// Read one variable.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ReadFailed`] if the identifier is unknown or
    /// names an object, or [`SessionError::Closed`].
    pub fn read_value(&self, id: NodeId) -> Result<Value, SessionError> {
        let space = self.space()?;
        space
            .value(id)
            .map_err(|source| SessionError::ReadFailed { id, source })
    }

    /// Read several variables.
    ///
    /// Duplicate identifiers collapse into one entry. An empty list yields
    /// an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PartialRead`] carrying both the values that
    /// were read and the per-identifier failures if any read fails, or
    /// [`SessionError::Closed`].
    pub fn read_group(&self, ids: &[NodeId]) -> Result<BTreeMap<NodeId, Value>, SessionError> {
        let space = self.space()?;
        let mut values = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for &id in ids {
            match space.value(id) {
                Ok(value) => {
                    values.insert(id, value);
                }
                Err(source) => {
                    failures.insert(id, source);
                }
            }
        }

        if failures.is_empty() {
            Ok(values)
        } else {
            debug!(
                session_id = %self.id,
                read = values.len(),
                failed = failures.len(),
                "Group read partially failed"
            );
            Err(PartialReadError { values, failures }.into())
        }
    }

    /// Write one writable variable. The value's tag must match the
    /// variable's declared type.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::WriteRejected`] wrapping
    /// [`AddressSpaceError::NotFound`], [`AddressSpaceError::NotAVariable`],
    /// [`AddressSpaceError::NotWritable`], or
    /// [`AddressSpaceError::TypeMismatch`], [`SessionError::NegativeSpeed`]
    /// for a negative motor speed, or [`SessionError::Closed`].
    pub fn write_value(&self, id: NodeId, value: Value) -> Result<(), SessionError> {
        let space = self.space()?;
        if let Value::Int(speed) = value
            && speed < 0
            && self.speeds.contains(&id)
        {
            return Err(SessionError::NegativeSpeed { id, value: speed });
        }
        space
            .set_value(id, value, WriteOrigin::External)
            .map_err(|source| SessionError::WriteRejected { id, source })?;
        debug!(session_id = %self.id, node = %id, %value, "Value written");
        Ok(())
    }

    /// Snapshot of one node's attributes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ReadFailed`] if the identifier is unknown, or
    /// [`SessionError::Closed`].
    pub fn node(&self, id: NodeId) -> Result<Node, SessionError> {
        let space = self.space()?;
        space
            .get(id)
            .map_err(|source| SessionError::ReadFailed { id, source })
    }

    /// List the children of an object.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ReadFailed`] if the identifier is unknown,
    /// or [`SessionError::Closed`].
    pub fn browse(&self, id: NodeId) -> Result<Vec<BrowseEntry>, SessionError> {
        let space = self.space()?;
        space
            .browse(id)
            .map_err(|source| SessionError::ReadFailed { id, source })
    }

    /// Every node reachable from the root, depth-first, with depths.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`].
    pub fn browse_tree(&self) -> Result<Vec<TreeEntry>, SessionError> {
        let space = self.space()?;
        let root = space.root();
        space
            .walk(root)
            .map_err(|source| SessionError::ReadFailed { id: root, source })
    }

    /// Release the session. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(session_id = %self.id, "Session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
