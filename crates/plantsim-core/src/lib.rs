//! Simulation engine, sessions, and server lifecycle for plantsim.
//!
//! A [`ServerLifecycle`] owns a factory address space and the
//! [`SimulationEngine`] that mutates it on a fixed cadence. External
//! consumers open a [`Session`] against a running server to read, write,
//! and browse variables.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `plantsim-config.yaml` into
//!   strongly-typed structs.
//! - [`engine`] -- The tick thread and its start/stop state machine.
//! - [`lifecycle`] -- Server start/stop and status reporting.
//! - [`operator`] -- Shared control state: tick speed, counters, end
//!   reason, and faults.
//! - [`session`] -- Client sessions with partial-failure batch reads.
//! - [`tick`] -- The per-tick update rules.
//!
//! [`ServerLifecycle`]: lifecycle::ServerLifecycle
//! [`SimulationEngine`]: engine::SimulationEngine
//! [`Session`]: session::Session

pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod operator;
pub mod session;
pub mod tick;

pub use config::{ConfigError, PlantConfig};
pub use engine::{EngineError, EngineState, EngineStatus, SimulationEngine, StopOutcome};
pub use lifecycle::{LifecycleError, ServerLifecycle, ServerStatus};
pub use operator::{EndReason, SimulationFault};
pub use session::{ConnectionError, EndpointConfig, PartialReadError, Session, SessionError};
pub use tick::{TickError, TickPlan, TickSummary};
