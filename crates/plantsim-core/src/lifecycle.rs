//! Server lifecycle: owns the address space and the engine that drives it.
//!
//! [`ServerLifecycle::start`] builds the factory topology and starts the
//! engine. [`ServerLifecycle::stop`] stops the engine, closes every session
//! opened against this run, and releases the address space. Each instance is
//! independent; tests may run several side by side.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use plantsim_space::{AddressSpace, AddressSpaceError, FactoryNodes, build_factory};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ConfigError, PlantConfig};
use crate::engine::{EngineError, EngineStatus, SimulationEngine, StopOutcome};
use crate::tick::TickPlan;

/// Errors that can occur when starting the server.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// The configuration failed validation.
    #[error("invalid configuration: {source}")]
    Config {
        /// The underlying validation error.
        #[from]
        source: ConfigError,
    },

    /// The configured layout could not be built.
    #[error("failed to build address space: {source}")]
    Topology {
        /// The underlying address-space error.
        #[from]
        source: AddressSpaceError,
    },

    /// The engine could not be started.
    #[error("failed to start simulation engine: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: EngineError,
    },
}

/// JSON-serializable status of the server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Configured server name.
    pub name: String,
    /// Endpoint sessions connect to.
    pub endpoint: String,
    /// Whether the server is running.
    pub running: bool,
    /// When the current run started.
    pub started_at: Option<DateTime<Utc>>,
    /// Number of nodes in the address space (0 while stopped).
    pub node_count: usize,
    /// Engine snapshot while running.
    pub engine: Option<EngineStatus>,
}

/// State that exists only while the server runs.
#[derive(Debug)]
struct RunningServer {
    space: Arc<AddressSpace>,
    nodes: FactoryNodes,
    engine: SimulationEngine,
    /// Cleared on stop; sessions check it before every operation.
    serving: Arc<AtomicBool>,
    started_at: DateTime<Utc>,
}

/// Owns one simulated server from start to stop.
#[derive(Debug)]
pub struct ServerLifecycle {
    config: PlantConfig,
    running: Option<RunningServer>,
}

impl ServerLifecycle {
    /// Create a stopped server.
    pub const fn new(config: PlantConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }

    /// Build the address space and start the engine.
    ///
    /// Does nothing if the server is already running.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Config`] if the configuration does not
    /// validate, [`LifecycleError::Topology`] if the layout does not fit its
    /// id ranges, or [`LifecycleError::Engine`] if the tick thread
    /// cannot be spawned. The server stays stopped on error.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.running.is_some() {
            debug!("Server already running");
            return Ok(());
        }

        self.config.validate()?;
        let simulation = &self.config.simulation;
        let (space, nodes) = build_factory(&simulation.layout())?;
        let space = Arc::new(space);
        let plan = TickPlan::new(simulation, &nodes);
        let engine = SimulationEngine::new(Arc::clone(&space), plan, simulation);
        engine.start()?;

        info!(
            name = %self.config.server.name,
            endpoint = %self.config.server.endpoint,
            nodes = space.len(),
            "Server started"
        );

        self.running = Some(RunningServer {
            space,
            nodes,
            engine,
            serving: Arc::new(AtomicBool::new(true)),
            started_at: Utc::now(),
        });
        Ok(())
    }

    /// Stop the engine and release the address space.
    ///
    /// Idempotent: stopping a stopped server returns
    /// [`StopOutcome::AlreadyStopped`].
    pub fn stop(&mut self) -> StopOutcome {
        let Some(running) = self.running.take() else {
            return StopOutcome::AlreadyStopped;
        };
        running.serving.store(false, Ordering::Release);
        let outcome = running.engine.stop();
        let ticks = running.engine.ticks();
        drop(running);
        info!(?outcome, ticks, "Server stopped");
        outcome
    }

    /// Whether the server is running.
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The configuration this server was created with.
    pub const fn config(&self) -> &PlantConfig {
        &self.config
    }

    /// The address space, while running.
    pub fn space(&self) -> Option<&Arc<AddressSpace>> {
        self.running.as_ref().map(|r| &r.space)
    }

    /// Identifiers of the factory nodes, while running.
    pub fn nodes(&self) -> Option<&FactoryNodes> {
        self.running.as_ref().map(|r| &r.nodes)
    }

    /// The engine, while running.
    pub fn engine(&self) -> Option<&SimulationEngine> {
        self.running.as_ref().map(|r| &r.engine)
    }

    /// Handles a new session needs, while running.
    pub(crate) fn connection(&self) -> Option<(Weak<AddressSpace>, Arc<AtomicBool>)> {
        self.running
            .as_ref()
            .map(|r| (Arc::downgrade(&r.space), Arc::clone(&r.serving)))
    }

    /// Snapshot of the server for status reporting.
    pub fn status(&self) -> ServerStatus {
        let running = self.running.as_ref();
        ServerStatus {
            name: self.config.server.name.clone(),
            endpoint: self.config.server.endpoint.clone(),
            running: running.is_some(),
            started_at: running.map(|r| r.started_at),
            node_count: running.map_or(0, |r| r.space.len()),
            engine: running.map(|r| r.engine.status()),
        }
    }
}

impl Drop for ServerLifecycle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::engine::EngineState;

    fn config() -> PlantConfig {
        let mut config = PlantConfig::default();
        config.simulation.tick_interval_ms = 10;
        config.simulation.seed = Some(1);
        config
    }

    #[test]
    fn start_builds_the_factory_and_runs_the_engine() {
        let mut server = ServerLifecycle::new(config());
        assert!(!server.is_running());
        server.start().unwrap();
        assert!(server.is_running());
        assert_eq!(server.space().unwrap().len(), 15);
        assert_eq!(server.engine().unwrap().state(), EngineState::Running);
        assert_eq!(server.nodes().unwrap().sensors.len(), 3);
    }

    #[test]
    fn start_twice_keeps_the_same_space() {
        let mut server = ServerLifecycle::new(config());
        server.start().unwrap();
        let first = Arc::clone(server.space().unwrap());
        server.start().unwrap();
        assert!(Arc::ptr_eq(&first, server.space().unwrap()));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut server = ServerLifecycle::new(config());
        assert_eq!(server.stop(), StopOutcome::AlreadyStopped);
        server.start().unwrap();
        assert_eq!(server.stop(), StopOutcome::Acknowledged);
        assert_eq!(server.stop(), StopOutcome::AlreadyStopped);
        assert!(server.space().is_none());
    }

    #[test]
    fn stop_releases_the_address_space() {
        let mut server = ServerLifecycle::new(config());
        server.start().unwrap();
        let weak = server.connection().unwrap().0;
        server.stop();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn status_serializes() {
        let mut server = ServerLifecycle::new(config());
        let stopped = serde_json::to_value(server.status()).unwrap();
        assert_eq!(stopped["running"], false);
        assert_eq!(stopped["node_count"], 0);

        server.start().unwrap();
        let status = server.status();
        assert!(status.running);
        assert_eq!(status.node_count, 15);
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["name"], "Industrial Simulation Server");
        assert_eq!(json["engine"]["state"], "running");
    }

    #[test]
    fn oversized_layout_fails_to_start() {
        let mut config = config();
        let template = config.simulation.sensors.first().cloned().unwrap();
        config.simulation.sensors = vec![template; 11];
        let mut server = ServerLifecycle::new(config);
        assert!(matches!(server.start(), Err(LifecycleError::Config { .. })));
        assert!(!server.is_running());
    }

    #[test]
    fn invalid_rule_ranges_fail_to_start() {
        let mut inverted = config();
        let sensor = inverted.simulation.sensors.first_mut().unwrap();
        sensor.low = 4.0;
        sensor.high = 1.0;

        let mut empty_production = config();
        let motor = empty_production.simulation.motors.first_mut().unwrap();
        motor.production_min = 5;
        motor.production_max = 1;

        let mut nan_delta = config();
        nan_delta.simulation.motors.first_mut().unwrap().speed_delta = f64::NAN;

        for config in [inverted, empty_production, nan_delta] {
            let mut server = ServerLifecycle::new(config);
            assert!(matches!(server.start(), Err(LifecycleError::Config { .. })));
            assert!(!server.is_running());
            assert!(server.engine().is_none());
        }
    }
}
