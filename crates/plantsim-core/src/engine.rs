//! The simulation engine: a dedicated OS thread that applies one tick every
//! interval until stopped.
//!
//! The engine moves between two states, `Stopped` and `Running`:
//!
//! - [`SimulationEngine::start`] spawns the `simulation-tick` thread. Calling
//!   it while running does nothing.
//! - [`SimulationEngine::stop`] raises the run's cancel flag, wakes the
//!   thread out of its inter-tick sleep, and waits at most
//!   `shutdown_timeout` for acknowledgement. A thread that misses the
//!   deadline is detached; its cancel flag guarantees it never ticks again.
//! - A failing tick records a [`SimulationFault`] and stops the run.
//!   Values already written stay readable.
//! - With `max_ticks > 0` the run stops itself after that many ticks.
//!
//! Ticks are serialized through the RNG lock, so a manual
//! [`SimulationEngine::tick_once`] never interleaves with a threaded tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use plantsim_space::AddressSpace;
use rand::SeedableRng;
use rand::rngs::SmallRng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::SimulationConfig;
use crate::operator::{EndReason, OperatorState, SimulationFault};
use crate::tick::{self, TickPlan, TickSummary};

/// Name given to the tick thread.
const TICK_THREAD_NAME: &str = "simulation-tick";

/// Errors that can occur when starting the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The operating system refused to spawn the tick thread.
    #[error("failed to spawn tick thread: {source}")]
    Spawn {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

/// Whether the engine is currently ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// No tick thread is running.
    Stopped,
    /// The tick thread is running.
    Running,
}

/// What [`SimulationEngine::stop`] observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The engine was not running.
    AlreadyStopped,
    /// The tick thread acknowledged the stop and exited.
    Acknowledged,
    /// The tick thread did not acknowledge within the shutdown timeout and
    /// was detached.
    TimedOut,
}

/// JSON-serializable snapshot of the engine for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Current state.
    pub state: EngineState,
    /// Ticks executed over the engine's lifetime.
    pub ticks: u64,
    /// Current tick interval in milliseconds.
    pub tick_interval_ms: u64,
    /// Configured maximum ticks per run (0 = unlimited).
    pub max_ticks: u64,
    /// Why the last run ended, if it has.
    pub end_reason: Option<EndReason>,
    /// Most recent tick failure, rendered as text.
    pub last_fault: Option<String>,
    /// When the current or last run started.
    pub started_at: Option<DateTime<Utc>>,
}

/// Per-run flags shared by the handle and one tick thread.
#[derive(Debug)]
struct RunFlags {
    /// Set by `stop`; the thread exits at the next check.
    cancel: AtomicBool,
    /// Cleared by the thread as it exits, on every path.
    alive: AtomicBool,
}

/// Handle to a spawned tick thread.
#[derive(Debug)]
struct Worker {
    flags: Arc<RunFlags>,
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    fn is_alive(&self) -> bool {
        self.flags.alive.load(Ordering::Acquire)
    }

    fn join(self) {
        if self.handle.join().is_err() {
            warn!("Tick thread panicked");
        }
    }
}

/// Everything the tick thread needs, moved onto it at spawn.
struct TickLoop {
    space: Arc<AddressSpace>,
    plan: Arc<TickPlan>,
    operator: Arc<OperatorState>,
    rng: Arc<Mutex<SmallRng>>,
    flags: Arc<RunFlags>,
    stop_rx: Receiver<()>,
}

/// Signals the handle when the tick thread exits, including by panic.
struct ExitGuard {
    flags: Arc<RunFlags>,
    operator: Arc<OperatorState>,
    done_tx: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Tick thread panicked");
            self.operator.set_end_reason(EndReason::Fault);
        }
        self.flags.alive.store(false, Ordering::Release);
        // The handle may already have given up waiting.
        let _ = self.done_tx.send(());
    }
}

/// Drives the factory rules on a dedicated thread.
#[derive(Debug)]
pub struct SimulationEngine {
    space: Arc<AddressSpace>,
    plan: Arc<TickPlan>,
    operator: Arc<OperatorState>,
    rng: Arc<Mutex<SmallRng>>,
    shutdown_timeout: Duration,
    worker: Mutex<Option<Worker>>,
}

impl SimulationEngine {
    /// Create a stopped engine that applies `plan` to `space`.
    ///
    /// A configured `seed` makes the sequence of random draws reproducible;
    /// otherwise the RNG is seeded from the operating system.
    pub fn new(space: Arc<AddressSpace>, plan: TickPlan, config: &SimulationConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(SmallRng::from_os_rng, SmallRng::seed_from_u64);
        Self {
            space,
            plan: Arc::new(plan),
            operator: Arc::new(OperatorState::new(config)),
            rng: Arc::new(Mutex::new(rng)),
            shutdown_timeout: config.shutdown_timeout(),
            worker: Mutex::new(None),
        }
    }

    /// Start ticking on a new `simulation-tick` thread.
    ///
    /// Does nothing if the engine is already running.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the thread cannot be created; the
    /// engine stays stopped.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut slot = self.worker.lock();
        if let Some(previous) = slot.take() {
            if previous.is_alive() {
                *slot = Some(previous);
                debug!("Simulation engine already running");
                return Ok(());
            }
            previous.join();
        }

        let flags = Arc::new(RunFlags {
            cancel: AtomicBool::new(false),
            alive: AtomicBool::new(true),
        });
        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let tick_loop = TickLoop {
            space: Arc::clone(&self.space),
            plan: Arc::clone(&self.plan),
            operator: Arc::clone(&self.operator),
            rng: Arc::clone(&self.rng),
            flags: Arc::clone(&flags),
            stop_rx,
        };
        let guard = ExitGuard {
            flags: Arc::clone(&flags),
            operator: Arc::clone(&self.operator),
            done_tx,
        };

        self.operator.begin_run();
        let handle = thread::Builder::new()
            .name(TICK_THREAD_NAME.to_owned())
            .spawn(move || {
                let _guard = guard;
                tick_loop.run();
            })?;

        info!(
            tick_interval_ms = self.operator.tick_interval_ms(),
            max_ticks = self.operator.max_ticks(),
            "Simulation engine started"
        );

        *slot = Some(Worker {
            flags,
            stop_tx,
            done_rx,
            handle,
        });
        Ok(())
    }

    /// Stop ticking and wait, bounded by the shutdown timeout, for the tick
    /// thread to exit.
    ///
    /// Idempotent: stopping a stopped engine returns
    /// [`StopOutcome::AlreadyStopped`].
    pub fn stop(&self) -> StopOutcome {
        let Some(worker) = self.worker.lock().take() else {
            return StopOutcome::AlreadyStopped;
        };
        if !worker.is_alive() {
            worker.join();
            return StopOutcome::AlreadyStopped;
        }

        worker.flags.cancel.store(true, Ordering::Release);
        // A send error means the thread is already on its way out.
        let _ = worker.stop_tx.send(());

        match worker.done_rx.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                worker.join();
                self.operator.set_end_reason(EndReason::OperatorStop);
                info!(ticks = self.operator.ticks(), "Simulation engine stopped");
                StopOutcome::Acknowledged
            }
            Err(RecvTimeoutError::Timeout) => {
                self.operator.set_end_reason(EndReason::OperatorStop);
                warn!(
                    timeout_ms = self.shutdown_timeout.as_millis(),
                    "Tick thread did not acknowledge stop in time, detaching it"
                );
                StopOutcome::TimedOut
            }
        }
    }

    /// Current state of the engine.
    pub fn state(&self) -> EngineState {
        match self.worker.lock().as_ref() {
            Some(worker) if worker.is_alive() => EngineState::Running,
            _ => EngineState::Stopped,
        }
    }

    /// Run one tick synchronously on the calling thread.
    ///
    /// Works whether or not the engine is running.
    ///
    /// # Errors
    ///
    /// Returns the [`SimulationFault`] if the tick fails; it is also
    /// recorded as the last fault.
    pub fn tick_once(&self) -> Result<TickSummary, SimulationFault> {
        let result = {
            let mut rng = self.rng.lock();
            tick::run_tick(&self.space, &self.plan, &mut *rng)
        };
        match result {
            Ok(summary) => {
                self.operator.record_tick();
                Ok(summary)
            }
            Err(source) => {
                let fault = SimulationFault {
                    tick: self.operator.ticks(),
                    source,
                };
                error!(error = %fault, "Manual tick failed");
                self.operator.record_fault(fault.clone());
                Err(fault)
            }
        }
    }

    /// Change the tick interval. Takes effect after the current sleep.
    ///
    /// Returns the previous interval, or `None` if `ms` is below the
    /// minimum.
    pub fn set_tick_interval(&self, ms: u64) -> Option<u64> {
        let previous = self.operator.set_tick_interval_ms(ms);
        if let Some(previous) = previous {
            info!(previous_ms = previous, tick_interval_ms = ms, "Tick interval changed");
        }
        previous
    }

    /// Ticks executed over the engine's lifetime.
    pub fn ticks(&self) -> u64 {
        self.operator.ticks()
    }

    /// Most recent tick failure, if any.
    pub fn last_fault(&self) -> Option<SimulationFault> {
        self.operator.last_fault()
    }

    /// Why the last run ended; `None` while running or before the first run.
    pub fn end_reason(&self) -> Option<EndReason> {
        self.operator.end_reason()
    }

    /// Snapshot of the engine for status reporting.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.state(),
            ticks: self.operator.ticks(),
            tick_interval_ms: self.operator.tick_interval_ms(),
            max_ticks: self.operator.max_ticks(),
            end_reason: self.operator.end_reason(),
            last_fault: self.operator.last_fault().map(|f| f.to_string()),
            started_at: self.operator.started_at(),
        }
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl TickLoop {
    fn run(self) {
        let reason = self.run_until_done();
        // A cancelled run's reason is recorded by `stop`; a detached thread
        // must not overwrite the reason of a later run.
        if !self.flags.cancel.load(Ordering::Acquire) {
            self.operator.set_end_reason(reason);
        }
        info!(reason = ?reason, ticks = self.operator.ticks(), "Tick loop exited");
    }

    fn run_until_done(&self) -> EndReason {
        let mut run_ticks: u64 = 0;
        loop {
            // --- Check stop request (before tick) ---
            if self.flags.cancel.load(Ordering::Acquire) {
                return EndReason::OperatorStop;
            }

            // --- Execute tick ---
            let result = {
                let mut rng = self.rng.lock();
                // The lock may have been contended across a stop.
                if self.flags.cancel.load(Ordering::Acquire) {
                    return EndReason::OperatorStop;
                }
                tick::run_tick(&self.space, &self.plan, &mut *rng)
            };
            match result {
                Ok(summary) => {
                    let ticks = self.operator.record_tick();
                    run_ticks = run_ticks.saturating_add(1);
                    debug!(
                        tick = ticks,
                        uptime = summary.uptime,
                        total_production = summary.total_production,
                        "Tick completed"
                    );
                }
                Err(source) => {
                    let fault = SimulationFault {
                        tick: self.operator.ticks(),
                        source,
                    };
                    error!(error = %fault, "Tick failed, stopping simulation engine");
                    self.operator.record_fault(fault);
                    return EndReason::Fault;
                }
            }

            // --- Check tick limit (after tick) ---
            if self.operator.tick_limit_reached(run_ticks) {
                info!(
                    run_ticks,
                    max_ticks = self.operator.max_ticks(),
                    "Tick limit reached"
                );
                return EndReason::MaxTicksReached;
            }

            // --- Sleep for tick interval, waking early on stop ---
            match self.stop_rx.recv_timeout(self.operator.tick_interval()) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    return EndReason::OperatorStop;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::time::Instant;

    use plantsim_space::{FactoryNodes, WriteOrigin, build_factory};
    use plantsim_types::Value;

    use super::*;
    use crate::tick::TickError;

    fn engine(config: &SimulationConfig) -> (Arc<AddressSpace>, FactoryNodes, SimulationEngine) {
        let (space, nodes) = build_factory(&config.layout()).unwrap();
        let space = Arc::new(space);
        let plan = TickPlan::new(config, &nodes);
        let engine = SimulationEngine::new(Arc::clone(&space), plan, config);
        (space, nodes, engine)
    }

    fn fast_config() -> SimulationConfig {
        SimulationConfig {
            tick_interval_ms: 10,
            shutdown_timeout_ms: 2_000,
            seed: Some(42),
            ..SimulationConfig::default()
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn new_engine_is_stopped() {
        let (_, _, engine) = engine(&fast_config());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.stop(), StopOutcome::AlreadyStopped);
        assert_eq!(engine.end_reason(), None);
    }

    #[test]
    fn start_ticks_and_stop_acknowledges() {
        let (space, nodes, engine) = engine(&fast_config());
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(wait_until(|| engine.ticks() >= 3));
        assert_eq!(engine.stop(), StopOutcome::Acknowledged);
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.end_reason(), Some(EndReason::OperatorStop));
        let uptime = space.value(nodes.uptime).unwrap().as_int().unwrap();
        assert_eq!(u64::try_from(uptime).unwrap(), engine.ticks());
        assert_eq!(engine.stop(), StopOutcome::AlreadyStopped);
    }

    #[test]
    fn start_while_running_is_a_no_op() {
        let (_, _, engine) = engine(&fast_config());
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        assert_eq!(engine.stop(), StopOutcome::Acknowledged);
    }

    #[test]
    fn stop_interrupts_a_long_sleep() {
        let config = SimulationConfig {
            tick_interval_ms: 60_000,
            ..fast_config()
        };
        let (_, _, engine) = engine(&config);
        engine.start().unwrap();
        assert!(wait_until(|| engine.ticks() >= 1));
        let started = Instant::now();
        assert_eq!(engine.stop(), StopOutcome::Acknowledged);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn max_ticks_stops_the_run() {
        let config = SimulationConfig {
            max_ticks: 4,
            ..fast_config()
        };
        let (_, _, engine) = engine(&config);
        engine.start().unwrap();
        assert!(wait_until(|| engine.state() == EngineState::Stopped));
        assert_eq!(engine.ticks(), 4);
        assert_eq!(engine.end_reason(), Some(EndReason::MaxTicksReached));
        assert_eq!(engine.stop(), StopOutcome::AlreadyStopped);
    }

    #[test]
    fn restart_continues_counters() {
        let config = SimulationConfig {
            max_ticks: 2,
            ..fast_config()
        };
        let (space, nodes, engine) = engine(&config);
        engine.start().unwrap();
        assert!(wait_until(|| engine.state() == EngineState::Stopped));
        engine.start().unwrap();
        assert!(wait_until(|| engine.ticks() == 4 && engine.state() == EngineState::Stopped));
        assert_eq!(space.value(nodes.uptime).unwrap(), Value::Int(4));
    }

    #[test]
    fn tick_once_steps_manually() {
        let (space, nodes, engine) = engine(&fast_config());
        let summary = engine.tick_once().unwrap();
        assert_eq!(summary.uptime, 1);
        assert_eq!(engine.ticks(), 1);
        assert_eq!(space.value(nodes.uptime).unwrap(), Value::Int(1));
    }

    #[test]
    fn fault_stops_the_engine_and_keeps_values_readable() {
        let (space, nodes, engine) = engine(&fast_config());
        space
            .set_value(nodes.uptime, Value::Int(i64::MAX), WriteOrigin::Simulation)
            .unwrap();
        engine.start().unwrap();
        assert!(wait_until(|| engine.state() == EngineState::Stopped));
        assert_eq!(engine.end_reason(), Some(EndReason::Fault));
        assert!(engine.last_fault().is_some());
        assert!(space.value(*nodes.sensors.first().unwrap()).is_ok());
    }

    #[test]
    fn invalid_range_faults_the_run_instead_of_panicking() {
        let mut config = fast_config();
        let sensor = config.sensors.first_mut().unwrap();
        sensor.low = 4.0;
        sensor.high = 1.0;
        let (_, nodes, engine) = engine(&config);
        engine.start().unwrap();
        assert!(wait_until(|| engine.state() == EngineState::Stopped));
        assert_eq!(engine.end_reason(), Some(EndReason::Fault));
        assert_eq!(engine.ticks(), 0);
        let fault = engine.last_fault().unwrap();
        assert_eq!(
            fault.source,
            TickError::InvalidRange {
                id: *nodes.sensors.first().unwrap()
            }
        );
    }

    #[test]
    fn tick_once_reports_an_invalid_range() {
        let mut config = fast_config();
        let motor = config.motors.first_mut().unwrap();
        motor.production_min = 5;
        motor.production_max = 1;
        let (space, nodes, engine) = engine(&config);
        let motor = *nodes.motors.first().unwrap();
        space
            .set_value(motor.status, Value::Bool(true), WriteOrigin::External)
            .unwrap();
        let fault = engine.tick_once().unwrap_err();
        assert_eq!(fault.source, TickError::InvalidRange { id: motor.speed });
        assert_eq!(engine.last_fault(), Some(fault));
    }

    #[test]
    fn stop_times_out_and_detaches_a_stuck_thread() {
        let config = SimulationConfig {
            shutdown_timeout_ms: 100,
            ..fast_config()
        };
        let (space, nodes, engine) = engine(&config);
        engine.start().unwrap();
        assert!(wait_until(|| engine.ticks() >= 1));

        let rng = engine.rng.lock();
        // Long enough for the thread to leave its sleep and block on the lock.
        thread::sleep(Duration::from_millis(100));
        let started = Instant::now();
        assert_eq!(engine.stop(), StopOutcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.end_reason(), Some(EndReason::OperatorStop));

        let uptime = space.value(nodes.uptime).unwrap();
        drop(rng);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(space.value(nodes.uptime).unwrap(), uptime);

        engine.start().unwrap();
        assert_eq!(engine.state(), EngineState::Running);
        let before = engine.ticks();
        assert!(wait_until(|| engine.ticks() > before));
        assert_eq!(engine.end_reason(), None);
        assert_eq!(engine.stop(), StopOutcome::Acknowledged);
    }

    #[test]
    fn tick_interval_has_a_floor() {
        let (_, _, engine) = engine(&fast_config());
        assert_eq!(engine.set_tick_interval(5), None);
        assert_eq!(engine.set_tick_interval(20), Some(10));
        assert_eq!(engine.status().tick_interval_ms, 20);
    }
}
