//! One simulation tick: the update rules applied to the factory variables.
//!
//! Each tick runs these steps, in order:
//!
//! 1. **Temperatures** -- every sensor reads `round2(baseline + uniform(low,
//!    high))`. Sensors have no memory of their previous value.
//!
//! 2. **Motors** -- for each motor whose status is `true`, the speed drifts
//!    by `uniform(-delta, +delta)`, is clamped at zero and truncated to an
//!    integer, and the motor adds `uniform_int(min, max)` units to total
//!    production. Stopped motors keep their speed and produce nothing.
//!
//! 3. **Uptime** -- incremented by one.
//!
//! Counters are read back from the address space on every tick, so a
//! restarted engine continues from where the previous run left off.
//!
//! Reads and writes go through the address space one variable at a time.
//! A session that writes a motor speed between the tick's read and its
//! write loses that write; readers see each variable move independently.

use plantsim_space::{AddressSpace, AddressSpaceError, FactoryNodes, WriteOrigin};
use plantsim_types::{NodeId, Value, ValueType};
use rand::Rng;
use tracing::debug;

use crate::config::SimulationConfig;

/// Errors that can occur during tick execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    /// An address-space operation failed.
    #[error("address space error: {source}")]
    Space {
        /// The underlying address-space error.
        #[from]
        source: AddressSpaceError,
    },

    /// A variable the rules depend on holds a value of the wrong type.
    #[error("unexpected value on {id}: expected {expected}, found {found}")]
    UnexpectedValue {
        /// The variable that was read.
        id: NodeId,
        /// Type the rule needs.
        expected: ValueType,
        /// Type actually stored.
        found: ValueType,
    },

    /// A counter would exceed the integer range.
    #[error("counter {id} overflowed")]
    CounterOverflow {
        /// The counter variable.
        id: NodeId,
    },

    /// A rule's random range is empty or not finite.
    #[error("rule for {id} has an empty or non-finite random range")]
    InvalidRange {
        /// The variable the rule drives.
        id: NodeId,
    },
}

/// Update rule for one temperature sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorRule {
    /// Sensor variable.
    pub id: NodeId,
    /// Centre value.
    pub baseline: f64,
    /// Lower bound of the per-tick offset.
    pub low: f64,
    /// Upper bound of the per-tick offset.
    pub high: f64,
}

/// Update rule for one motor.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorRule {
    /// Integer speed variable.
    pub speed: NodeId,
    /// Boolean status variable gating the rule.
    pub status: NodeId,
    /// Largest per-tick speed change.
    pub delta: f64,
    /// Fewest units produced per running tick.
    pub production_min: u32,
    /// Most units produced per running tick.
    pub production_max: u32,
}

/// Every rule the engine applies per tick, bound to concrete node ids.
#[derive(Debug, Clone, PartialEq)]
pub struct TickPlan {
    /// Sensor rules, in layout order.
    pub sensors: Vec<SensorRule>,
    /// Motor rules, in layout order.
    pub motors: Vec<MotorRule>,
    /// Uptime counter.
    pub uptime: NodeId,
    /// Total production counter.
    pub total_production: NodeId,
}

impl TickPlan {
    /// Bind the configured rules to the nodes of a built factory.
    ///
    /// Rules and nodes pair up in order; surplus entries on either side are
    /// ignored.
    pub fn new(config: &SimulationConfig, nodes: &FactoryNodes) -> Self {
        let sensors = config
            .sensors
            .iter()
            .zip(&nodes.sensors)
            .map(|(sensor, &id)| SensorRule {
                id,
                baseline: sensor.baseline,
                low: sensor.low,
                high: sensor.high,
            })
            .collect();
        let motors = config
            .motors
            .iter()
            .zip(&nodes.motors)
            .map(|(motor, ids)| MotorRule {
                speed: ids.speed,
                status: ids.status,
                delta: motor.speed_delta,
                production_min: motor.production_min,
                production_max: motor.production_max,
            })
            .collect();
        Self {
            sensors,
            motors,
            uptime: nodes.uptime,
            total_production: nodes.total_production,
        }
    }
}

/// Summary of a single tick's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    /// Uptime after the tick.
    pub uptime: i64,
    /// Total production after the tick.
    pub total_production: i64,
    /// Units produced during this tick.
    pub produced: u64,
    /// Motors whose status was `true` during this tick.
    pub active_motors: usize,
}

/// Apply one tick of every rule in `plan` to `space`.
///
/// # Errors
///
/// Returns [`TickError`] if a variable is missing, holds an unexpected
/// type, a rule's random range is empty, or a counter would overflow.
/// Writes made before the failure stay in place.
pub fn run_tick<R: Rng + ?Sized>(
    space: &AddressSpace,
    plan: &TickPlan,
    rng: &mut R,
) -> Result<TickSummary, TickError> {
    // --- Temperatures ---
    for sensor in &plan.sensors {
        if !is_float_range(sensor.low, sensor.high) {
            return Err(TickError::InvalidRange { id: sensor.id });
        }
        let offset = rng.random_range(sensor.low..=sensor.high);
        let reading = round2(sensor.baseline + offset);
        space.set_value(sensor.id, Value::Float(reading), WriteOrigin::Simulation)?;
    }

    // --- Motors and production ---
    let mut produced: u64 = 0;
    let mut active_motors: usize = 0;
    for motor in &plan.motors {
        if !read_bool(space, motor.status)? {
            continue;
        }
        active_motors = active_motors.saturating_add(1);
        if !is_float_range(-motor.delta, motor.delta)
            || motor.production_min > motor.production_max
        {
            return Err(TickError::InvalidRange { id: motor.speed });
        }

        let current = read_int(space, motor.speed)?;
        let drift = rng.random_range(-motor.delta..=motor.delta);
        space.set_value(
            motor.speed,
            Value::Int(drifted_speed(current, drift)),
            WriteOrigin::Simulation,
        )?;

        let units = rng.random_range(motor.production_min..=motor.production_max);
        produced = produced.saturating_add(u64::from(units));
    }

    let total_production = if produced == 0 {
        read_int(space, plan.total_production)?
    } else {
        let total = read_int(space, plan.total_production)?;
        let next = i64::try_from(produced)
            .ok()
            .and_then(|p| total.checked_add(p))
            .ok_or(TickError::CounterOverflow {
                id: plan.total_production,
            })?;
        space.set_value(plan.total_production, Value::Int(next), WriteOrigin::Simulation)?;
        next
    };

    // --- Uptime ---
    let uptime = read_int(space, plan.uptime)?
        .checked_add(1)
        .ok_or(TickError::CounterOverflow { id: plan.uptime })?;
    space.set_value(plan.uptime, Value::Int(uptime), WriteOrigin::Simulation)?;

    debug!(uptime, total_production, produced, active_motors, "Tick applied");

    Ok(TickSummary {
        uptime,
        total_production,
        produced,
        active_motors,
    })
}

/// Whether `low..=high` can be sampled: finite bounds, ordered, and a
/// finite width.
fn is_float_range(low: f64, high: f64) -> bool {
    low.is_finite() && high.is_finite() && low <= high && (high - low).is_finite()
}

/// Round to two decimal places.
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Apply a drift to an integer speed, clamping at zero and truncating.
fn drifted_speed(current: i64, drift: f64) -> i64 {
    // Speeds stay far below 2^53; the round trip through f64 is exact.
    #[allow(clippy::cast_precision_loss)]
    let next = (current as f64 + drift).max(0.0);
    // Non-negative after the clamp; `as` saturates on the high side.
    #[allow(clippy::cast_possible_truncation)]
    let speed = next.trunc() as i64;
    speed
}

fn read_int(space: &AddressSpace, id: NodeId) -> Result<i64, TickError> {
    let value = space.value(id)?;
    value.as_int().ok_or(TickError::UnexpectedValue {
        id,
        expected: ValueType::Int,
        found: value.value_type(),
    })
}

fn read_bool(space: &AddressSpace, id: NodeId) -> Result<bool, TickError> {
    let value = space.value(id)?;
    value.as_bool().ok_or(TickError::UnexpectedValue {
        id,
        expected: ValueType::Bool,
        found: value.value_type(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use plantsim_space::build_factory;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;

    fn factory() -> (AddressSpace, TickPlan, FactoryNodes) {
        let config = SimulationConfig::default();
        let (space, nodes) = build_factory(&config.layout()).unwrap();
        let plan = TickPlan::new(&config, &nodes);
        (space, plan, nodes)
    }

    fn int(space: &AddressSpace, id: NodeId) -> i64 {
        space.value(id).unwrap().as_int().unwrap()
    }

    #[test]
    fn plan_binds_every_rule() {
        let (_, plan, nodes) = factory();
        assert_eq!(plan.sensors.len(), 3);
        assert_eq!(plan.motors.len(), 2);
        assert_eq!(plan.motors.first().unwrap().speed, nodes.motors.first().unwrap().speed);
    }

    #[test]
    fn sensor_one_stays_in_range() {
        let (space, plan, nodes) = factory();
        let sensor = *nodes.sensors.first().unwrap();
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..200 {
            run_tick(&space, &plan, &mut rng).unwrap();
            let t = space.value(sensor).unwrap().as_float().unwrap();
            assert!((18.0..=23.0).contains(&t), "temperature {t} out of range");
        }
    }

    #[test]
    fn temperatures_have_two_decimals() {
        let (space, plan, nodes) = factory();
        let mut rng = SmallRng::seed_from_u64(2);
        run_tick(&space, &plan, &mut rng).unwrap();
        for &id in &nodes.sensors {
            let t = space.value(id).unwrap().as_float().unwrap();
            assert!((t * 100.0 - (t * 100.0).round()).abs() < 1e-6);
        }
    }

    #[test]
    fn stopped_motor_keeps_speed_and_produces_nothing() {
        let (space, plan, nodes) = factory();
        let motor = *nodes.motors.first().unwrap();
        space
            .set_value(motor.speed, Value::Int(10), WriteOrigin::External)
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..5 {
            let summary = run_tick(&space, &plan, &mut rng).unwrap();
            assert_eq!(summary.active_motors, 0);
        }
        assert_eq!(int(&space, motor.speed), 10);
        assert_eq!(int(&space, nodes.total_production), 0);
        assert_eq!(int(&space, nodes.uptime), 5);
    }

    #[test]
    fn running_motor_drifts_within_delta() {
        let (space, plan, nodes) = factory();
        let motor = *nodes.motors.first().unwrap();
        space
            .set_value(motor.speed, Value::Int(10), WriteOrigin::External)
            .unwrap();
        space
            .set_value(motor.status, Value::Bool(true), WriteOrigin::External)
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(4);
        let summary = run_tick(&space, &plan, &mut rng).unwrap();
        let speed = int(&space, motor.speed);
        assert!((5..=15).contains(&speed), "speed {speed} out of range");
        assert_eq!(summary.active_motors, 1);
        assert!((1..=3).contains(&summary.produced));
        assert_eq!(i64::try_from(summary.produced).unwrap(), summary.total_production);
    }

    #[test]
    fn speed_never_goes_negative() {
        let (space, plan, nodes) = factory();
        let motor = *nodes.motors.first().unwrap();
        space
            .set_value(motor.status, Value::Bool(true), WriteOrigin::External)
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(5);
        for _ in 0..100 {
            run_tick(&space, &plan, &mut rng).unwrap();
            assert!(int(&space, motor.speed) >= 0);
        }
    }

    #[test]
    fn counters_are_monotonic() {
        let (space, plan, nodes) = factory();
        for motor in &nodes.motors {
            space
                .set_value(motor.status, Value::Bool(true), WriteOrigin::External)
                .unwrap();
        }
        let mut rng = SmallRng::seed_from_u64(6);
        let mut last = run_tick(&space, &plan, &mut rng).unwrap();
        for _ in 0..50 {
            let next = run_tick(&space, &plan, &mut rng).unwrap();
            assert_eq!(next.uptime, last.uptime + 1);
            assert!(next.total_production >= last.total_production + 2);
            assert!(next.total_production <= last.total_production + 5);
            last = next;
        }
    }

    #[test]
    fn counters_continue_from_stored_values() {
        let (space, plan, nodes) = factory();
        space
            .set_value(nodes.uptime, Value::Int(41), WriteOrigin::Simulation)
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(7);
        let summary = run_tick(&space, &plan, &mut rng).unwrap();
        assert_eq!(summary.uptime, 42);
    }

    #[test]
    fn uptime_overflow_is_reported() {
        let (space, plan, nodes) = factory();
        space
            .set_value(nodes.uptime, Value::Int(i64::MAX), WriteOrigin::Simulation)
            .unwrap();
        let mut rng = SmallRng::seed_from_u64(8);
        let err = run_tick(&space, &plan, &mut rng).unwrap_err();
        assert_eq!(err, TickError::CounterOverflow { id: nodes.uptime });
    }

    #[test]
    fn inverted_sensor_range_is_reported_before_any_write() {
        let (space, mut plan, nodes) = factory();
        let sensor = plan.sensors.first_mut().unwrap();
        sensor.low = 4.0;
        sensor.high = 1.0;
        let id = sensor.id;
        let mut rng = SmallRng::seed_from_u64(9);
        let err = run_tick(&space, &plan, &mut rng).unwrap_err();
        assert_eq!(err, TickError::InvalidRange { id });
        assert_eq!(int(&space, nodes.uptime), 0);
    }

    #[test]
    fn bad_motor_ranges_are_reported_only_while_running() {
        let (space, mut plan, nodes) = factory();
        let motor = *nodes.motors.first().unwrap();
        let rule = plan.motors.first_mut().unwrap();
        rule.production_min = 5;
        rule.production_max = 1;
        let mut rng = SmallRng::seed_from_u64(10);

        // Stopped motors never draw from their ranges.
        run_tick(&space, &plan, &mut rng).unwrap();

        space
            .set_value(motor.status, Value::Bool(true), WriteOrigin::External)
            .unwrap();
        let err = run_tick(&space, &plan, &mut rng).unwrap_err();
        assert_eq!(err, TickError::InvalidRange { id: motor.speed });

        let rule = plan.motors.first_mut().unwrap();
        rule.production_min = 1;
        rule.production_max = 3;
        rule.delta = f64::NAN;
        let err = run_tick(&space, &plan, &mut rng).unwrap_err();
        assert_eq!(err, TickError::InvalidRange { id: motor.speed });
    }

    #[test]
    fn float_ranges_must_be_finite_and_ordered() {
        assert!(is_float_range(-2.0, 3.0));
        assert!(is_float_range(0.0, 0.0));
        assert!(!is_float_range(4.0, 1.0));
        assert!(!is_float_range(f64::NAN, 1.0));
        assert!(!is_float_range(-f64::MAX, f64::MAX));
    }

    #[test]
    fn drifted_speed_clamps_and_truncates() {
        assert_eq!(drifted_speed(2, -4.5), 0);
        assert_eq!(drifted_speed(10, 2.9), 12);
        assert_eq!(drifted_speed(10, -0.4), 9);
    }
}
