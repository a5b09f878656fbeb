//! Operator control state shared between the engine handle and its tick
//! thread.
//!
//! The operator can change tick speed, read counters, and learn why the
//! last run ended, all without stopping the engine.
//!
//! # Architecture
//!
//! Hot-path fields use [`std::sync::atomic`] types so the tick thread never
//! takes a lock to read its cadence. The rarely written end reason and
//! fault sit behind [`parking_lot::Mutex`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{MIN_TICK_INTERVAL_MS, SimulationConfig};
use crate::tick::TickError;

/// Reason why an engine run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// `stop` was called.
    OperatorStop,
    /// The run executed the configured `max_ticks`.
    MaxTicksReached,
    /// A tick failed and the engine stopped itself.
    Fault,
}

/// A tick that failed.
///
/// Faults stop the engine but leave the address space readable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("tick {tick} failed: {source}")]
pub struct SimulationFault {
    /// Engine tick count at the time of the failure (the failed tick is
    /// not counted).
    pub tick: u64,
    /// The underlying tick error.
    pub source: TickError,
}

/// Shared operator control state.
///
/// Wrapped in [`std::sync::Arc`] and shared between
/// [`SimulationEngine`](crate::engine::SimulationEngine) and its tick
/// thread.
#[derive(Debug)]
pub struct OperatorState {
    /// Current tick interval in milliseconds (runtime-adjustable).
    tick_interval_ms: AtomicU64,

    /// Ticks executed over the engine's lifetime.
    ticks: AtomicU64,

    /// Maximum ticks per run (0 = unlimited).
    max_ticks: u64,

    /// Wall-clock time the current or last run started.
    started_at: Mutex<Option<DateTime<Utc>>>,

    /// Reason the last run ended, if it has.
    end_reason: Mutex<Option<EndReason>>,

    /// Most recent tick failure.
    last_fault: Mutex<Option<SimulationFault>>,
}

impl OperatorState {
    /// Create a new operator state from configuration.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            tick_interval_ms: AtomicU64::new(config.tick_interval_ms.max(MIN_TICK_INTERVAL_MS)),
            ticks: AtomicU64::new(0),
            max_ticks: config.max_ticks,
            started_at: Mutex::new(None),
            end_reason: Mutex::new(None),
            last_fault: Mutex::new(None),
        }
    }

    // -----------------------------------------------------------------------
    // Run bookkeeping
    // -----------------------------------------------------------------------

    /// Mark the start of a new run, clearing the previous end reason.
    pub fn begin_run(&self) {
        *self.started_at.lock() = Some(Utc::now());
        *self.end_reason.lock() = None;
    }

    /// Record the reason the run ended. The first reason recorded for a run
    /// wins.
    pub fn set_end_reason(&self, reason: EndReason) {
        let mut guard = self.end_reason.lock();
        if guard.is_none() {
            *guard = Some(reason);
        }
    }

    /// Get the reason the last run ended, if it has.
    pub fn end_reason(&self) -> Option<EndReason> {
        *self.end_reason.lock()
    }

    /// Wall-clock start of the current or last run.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self.started_at.lock()
    }

    /// Record a failed tick.
    pub fn record_fault(&self, fault: SimulationFault) {
        *self.last_fault.lock() = Some(fault);
    }

    /// The most recent tick failure, if any.
    pub fn last_fault(&self) -> Option<SimulationFault> {
        self.last_fault.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Tick counting
    // -----------------------------------------------------------------------

    /// Count one completed tick and return the new lifetime total.
    pub fn record_tick(&self) -> u64 {
        self.ticks
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    /// Ticks executed over the engine's lifetime.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Get the configured max ticks per run.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    /// Check whether a run has executed its tick budget.
    ///
    /// Returns `true` if `max_ticks > 0` and `run_ticks >= max_ticks`.
    pub const fn tick_limit_reached(&self, run_ticks: u64) -> bool {
        self.max_ticks > 0 && run_ticks >= self.max_ticks
    }

    // -----------------------------------------------------------------------
    // Tick Speed
    // -----------------------------------------------------------------------

    /// Get the current tick interval in milliseconds.
    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms.load(Ordering::Acquire)
    }

    /// Get the current tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms())
    }

    /// Set the tick interval in milliseconds.
    ///
    /// Returns the previous interval on success, or `None` if the value was
    /// rejected (below [`MIN_TICK_INTERVAL_MS`]).
    pub fn set_tick_interval_ms(&self, ms: u64) -> Option<u64> {
        if ms < MIN_TICK_INTERVAL_MS {
            return None;
        }
        Some(self.tick_interval_ms.swap(ms, Ordering::AcqRel))
    }
}
