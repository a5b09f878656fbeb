//! The factory topology served by the simulation server.
//!
//! One `Factory` object holds a production line (temperature sensors and
//! motors) and a system-info block (uptime and production counters), all in
//! namespace 2:
//!
//! | local id | node |
//! |----------|------|
//! | 1 | Factory |
//! | 2 | ProductionLine1 |
//! | 3 | TemperatureSensors |
//! | 4 | Motors |
//! | 5 | SystemInfo |
//! | 10 + k | temperature sensor k (float, writable) |
//! | 20 + 2k, 21 + 2k | motor k speed (int) and status (bool), writable |
//! | 30 | Uptime (int, read-only) |
//! | 31 | TotalProduction (int, read-only) |

use plantsim_types::NodeId;
use tracing::debug;

use crate::address_space::{APP_NAMESPACE, AddressSpace, ROOT_ID};
use crate::error::AddressSpaceError;
use crate::node::NodeKind;

/// Local id of the first temperature sensor.
const SENSOR_BASE: u32 = 10;
/// Local id of the first motor's speed variable.
const MOTOR_BASE: u32 = 20;

/// Most sensors that fit between [`SENSOR_BASE`] and [`MOTOR_BASE`].
pub const MAX_SENSORS: usize = 10;
/// Most motors (two ids each) that fit between [`MOTOR_BASE`] and the
/// system counters.
pub const MAX_MOTORS: usize = 5;

const fn app(local: u32) -> NodeId {
    NodeId::new(APP_NAMESPACE, local)
}

/// One temperature sensor to place in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorLayout {
    /// Display name, e.g. `Sensor1_Temperature`.
    pub name: String,
    /// Value the sensor starts at.
    pub initial: f64,
}

/// What to put in the production line.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryLayout {
    /// Temperature sensors, in id order.
    pub sensors: Vec<SensorLayout>,
    /// Motor name prefixes (`Motor1` yields `Motor1_Speed` and
    /// `Motor1_Status`), in id order.
    pub motors: Vec<String>,
}

impl Default for FactoryLayout {
    fn default() -> Self {
        Self {
            sensors: vec![
                SensorLayout {
                    name: "Sensor1_Temperature".to_owned(),
                    initial: 20.0,
                },
                SensorLayout {
                    name: "Sensor2_Temperature".to_owned(),
                    initial: 25.0,
                },
                SensorLayout {
                    name: "Sensor3_Temperature".to_owned(),
                    initial: 22.0,
                },
            ],
            motors: vec!["Motor1".to_owned(), "Motor2".to_owned()],
        }
    }
}

/// Identifiers of the two variables that make up one motor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorNodes {
    /// Integer speed variable.
    pub speed: NodeId,
    /// Boolean on/off variable.
    pub status: NodeId,
}

/// Identifiers of every node in the factory, returned alongside the space
/// so callers can address specific sensors and counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryNodes {
    /// Top-level factory object.
    pub factory: NodeId,
    /// Production line object.
    pub production_line: NodeId,
    /// Folder holding the temperature sensors.
    pub temperature_sensors: NodeId,
    /// Sensor variables, in layout order.
    pub sensors: Vec<NodeId>,
    /// Folder holding the motors.
    pub motors_folder: NodeId,
    /// Motor variables, in layout order.
    pub motors: Vec<MotorNodes>,
    /// System information object.
    pub system_info: NodeId,
    /// Tick counter.
    pub uptime: NodeId,
    /// Cumulative production counter.
    pub total_production: NodeId,
}

/// Build the factory address space described by `layout`.
///
/// # Errors
///
/// Returns [`AddressSpaceError::LayoutTooLarge`] if the layout holds more
/// sensors or motors than their id ranges allow.
pub fn build_factory(
    layout: &FactoryLayout,
) -> Result<(AddressSpace, FactoryNodes), AddressSpaceError> {
    if layout.sensors.len() > MAX_SENSORS {
        return Err(AddressSpaceError::LayoutTooLarge {
            group: "sensors",
            requested: layout.sensors.len(),
            max: MAX_SENSORS,
        });
    }
    if layout.motors.len() > MAX_MOTORS {
        return Err(AddressSpaceError::LayoutTooLarge {
            group: "motors",
            requested: layout.motors.len(),
            max: MAX_MOTORS,
        });
    }

    let mut space = AddressSpace::new();

    let factory = space.create_with_id(app(1), ROOT_ID, NodeKind::Object, "Factory")?;
    let production_line =
        space.create_with_id(app(2), factory, NodeKind::Object, "ProductionLine1")?;

    // ---------------------------------------------------------------
    // Temperature sensors
    // ---------------------------------------------------------------

    let temperature_sensors = space.create_with_id(
        app(3),
        production_line,
        NodeKind::Object,
        "TemperatureSensors",
    )?;

    let mut sensors = Vec::with_capacity(layout.sensors.len());
    for (local, sensor) in (SENSOR_BASE..).zip(&layout.sensors) {
        let id = space.create_with_id(
            app(local),
            temperature_sensors,
            NodeKind::writable(sensor.initial),
            &sensor.name,
        )?;
        sensors.push(id);
    }

    // ---------------------------------------------------------------
    // Motors
    // ---------------------------------------------------------------

    let motors_folder =
        space.create_with_id(app(4), production_line, NodeKind::Object, "Motors")?;

    let mut motors = Vec::with_capacity(layout.motors.len());
    for (local, prefix) in (MOTOR_BASE..).step_by(2).zip(&layout.motors) {
        let speed = space.create_with_id(
            app(local),
            motors_folder,
            NodeKind::writable(0_i64),
            &format!("{prefix}_Speed"),
        )?;
        let status = space.create_with_id(
            app(local.saturating_add(1)),
            motors_folder,
            NodeKind::writable(false),
            &format!("{prefix}_Status"),
        )?;
        motors.push(MotorNodes { speed, status });
    }

    // ---------------------------------------------------------------
    // System information
    // ---------------------------------------------------------------

    let system_info = space.create_with_id(app(5), factory, NodeKind::Object, "SystemInfo")?;
    let uptime =
        space.create_with_id(app(30), system_info, NodeKind::read_only(0_i64), "Uptime")?;
    let total_production = space.create_with_id(
        app(31),
        system_info,
        NodeKind::read_only(0_i64),
        "TotalProduction",
    )?;

    debug!(
        nodes = space.len(),
        sensors = sensors.len(),
        motors = motors.len(),
        "Factory address space built"
    );

    Ok((
        space,
        FactoryNodes {
            factory,
            production_line,
            temperature_sensors,
            sensors,
            motors_folder,
            motors,
            system_info,
            uptime,
            total_production,
        },
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use plantsim_types::Value;

    use super::*;
    use crate::node::NodeClass;

    #[test]
    fn default_layout_has_fifteen_entities() {
        let (space, _) = build_factory(&FactoryLayout::default()).unwrap();
        // root + 5 objects + 3 sensors + 4 motor variables + 2 counters
        assert_eq!(space.len(), 15);
    }

    #[test]
    fn default_layout_uses_documented_ids() {
        let (space, nodes) = build_factory(&FactoryLayout::default()).unwrap();
        assert_eq!(nodes.factory, NodeId::new(2, 1));
        assert_eq!(nodes.sensors, vec![app(10), app(11), app(12)]);
        assert_eq!(
            nodes.motors,
            vec![
                MotorNodes { speed: app(20), status: app(21) },
                MotorNodes { speed: app(22), status: app(23) },
            ]
        );
        assert_eq!(nodes.uptime, app(30));
        assert_eq!(nodes.total_production, app(31));
        assert_eq!(space.find("Motor2_Status"), Some(app(23)));
        assert_eq!(space.value(app(11)).unwrap(), Value::Float(25.0));
    }

    #[test]
    fn counters_are_read_only_and_controls_writable() {
        let (space, nodes) = build_factory(&FactoryLayout::default()).unwrap();
        let uptime = space.get(nodes.uptime).unwrap();
        assert!(!uptime.as_variable().unwrap().writable);
        let status = space.get(nodes.motors.first().unwrap().status).unwrap();
        assert!(status.as_variable().unwrap().writable);
    }

    #[test]
    fn every_node_is_reachable_from_root() {
        let (space, _) = build_factory(&FactoryLayout::default()).unwrap();
        let walk = space.walk(space.root()).unwrap();
        assert_eq!(walk.len(), space.len());
        let variables = walk
            .iter()
            .filter(|e| e.entry.class == NodeClass::Variable)
            .count();
        assert_eq!(variables, 9);
    }

    #[test]
    fn oversized_layout_is_rejected() {
        let layout = FactoryLayout {
            sensors: Vec::new(),
            motors: (0..6).map(|i| format!("Motor{i}")).collect(),
        };
        let result = build_factory(&layout);
        assert!(matches!(
            result,
            Err(AddressSpaceError::LayoutTooLarge { group: "motors", requested: 6, max: 5 })
        ));
    }
}
