//! Configuration loading and typed config structures for plantsim.
//!
//! The canonical configuration lives in `plantsim-config.yaml`. This module
//! defines strongly-typed structs mirroring the YAML structure, a loader,
//! and [`PlantConfig::validate`] which rejects values the simulation cannot
//! run with.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use plantsim_space::{FactoryLayout, MAX_MOTORS, MAX_SENSORS, SensorLayout};
use plantsim_types::NodeId;
use serde::Deserialize;

/// Smallest accepted tick interval in milliseconds.
pub const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but holds unusable values.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

fn invalid(reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        reason: reason.into(),
    }
}

/// Top-level configuration.
///
/// Mirrors the structure of `plantsim-config.yaml`. Every field has a
/// default matching the factory the server simulates out of the box.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PlantConfig {
    /// Server identity, endpoint, and credentials.
    #[serde(default)]
    pub server: ServerConfig,

    /// Tick cadence and per-variable update rules.
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Periodic reading published by the server binary.
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PlantConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// Environment variables override the server section:
    /// - `PLANTSIM_ENDPOINT` overrides `server.endpoint`
    /// - `PLANTSIM_USERNAME` overrides `server.username`
    /// - `PLANTSIM_PASSWORD` overrides `server.password`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML or
    /// [`ConfigError::Invalid`] if validation fails.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.server.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check every section for values the simulation cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        if self.monitor.interval_ms == 0 {
            return Err(invalid("monitor.interval_ms must be at least 1"));
        }
        Ok(())
    }
}

/// Server identity and the credentials sessions must present.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// Human-readable server name.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Endpoint URL sessions must name to connect.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Required username; `None` disables authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password paired with `username`.
    #[serde(default)]
    pub password: Option<String>,
}

impl ServerConfig {
    /// Override endpoint and credentials with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PLANTSIM_ENDPOINT") {
            self.endpoint = val;
        }
        if let Ok(val) = std::env::var("PLANTSIM_USERNAME") {
            self.username = Some(val);
        }
        if let Ok(val) = std::env::var("PLANTSIM_PASSWORD") {
            self.password = Some(val);
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            endpoint: default_endpoint(),
            username: None,
            password: None,
        }
    }
}

/// Simulation cadence, bounds, and update rules.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Real-time milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How long `stop` waits for the tick thread to acknowledge.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Ticks per engine run before it stops itself (0 = unlimited).
    #[serde(default)]
    pub max_ticks: u64,

    /// RNG seed for reproducible runs; `None` seeds from the OS.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Temperature sensors, in id order.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,

    /// Motors, in id order.
    #[serde(default = "default_motors")]
    pub motors: Vec<MotorConfig>,
}

impl SimulationConfig {
    /// Tick interval as a [`Duration`].
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Shutdown acknowledgement timeout as a [`Duration`].
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// The address-space layout these rules drive. Sensors start at their
    /// baseline.
    pub fn layout(&self) -> FactoryLayout {
        FactoryLayout {
            sensors: self
                .sensors
                .iter()
                .map(|s| SensorLayout {
                    name: s.name.clone(),
                    initial: s.baseline,
                })
                .collect(),
            motors: self.motors.iter().map(|m| m.name.clone()).collect(),
        }
    }

    /// Check cadence and rule bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms < MIN_TICK_INTERVAL_MS {
            return Err(invalid(format!(
                "simulation.tick_interval_ms must be at least {MIN_TICK_INTERVAL_MS}"
            )));
        }
        if self.shutdown_timeout_ms == 0 {
            return Err(invalid("simulation.shutdown_timeout_ms must be at least 1"));
        }
        if self.sensors.len() > MAX_SENSORS {
            return Err(invalid(format!(
                "at most {MAX_SENSORS} sensors are supported, got {}",
                self.sensors.len()
            )));
        }
        if self.motors.len() > MAX_MOTORS {
            return Err(invalid(format!(
                "at most {MAX_MOTORS} motors are supported, got {}",
                self.motors.len()
            )));
        }
        for sensor in &self.sensors {
            sensor.validate()?;
        }
        for motor in &self.motors {
            motor.validate()?;
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_ticks: 0,
            seed: None,
            sensors: default_sensors(),
            motors: default_motors(),
        }
    }
}

/// One temperature sensor: each tick reads `baseline + uniform(low, high)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorConfig {
    /// Display name of the sensor variable.
    pub name: String,
    /// Centre value the sensor fluctuates around.
    pub baseline: f64,
    /// Lower bound of the per-tick offset.
    pub low: f64,
    /// Upper bound of the per-tick offset.
    pub high: f64,
}

impl SensorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.baseline.is_finite() && self.low.is_finite() && self.high.is_finite()) {
            return Err(invalid(format!("sensor {} has a non-finite bound", self.name)));
        }
        if self.low > self.high {
            return Err(invalid(format!(
                "sensor {}: low ({}) is above high ({})",
                self.name, self.low, self.high
            )));
        }
        Ok(())
    }
}

/// One motor: speed drifts by up to `speed_delta` per tick while running,
/// and each running tick adds `production_min..=production_max` units.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MotorConfig {
    /// Name prefix for the `_Speed` and `_Status` variables.
    pub name: String,
    /// Largest per-tick speed change, in either direction.
    pub speed_delta: f64,
    /// Fewest units produced per running tick.
    pub production_min: u32,
    /// Most units produced per running tick.
    pub production_max: u32,
}

impl MotorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let delta = self.speed_delta;
        if !delta.is_finite() || delta < 0.0 {
            return Err(invalid(format!(
                "motor {}: speed_delta must be a finite, non-negative number",
                self.name
            )));
        }
        if self.production_min > self.production_max {
            return Err(invalid(format!(
                "motor {}: production_min ({}) is above production_max ({})",
                self.name, self.production_min, self.production_max
            )));
        }
        Ok(())
    }
}

/// Periodic reading published by the server binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MonitorConfig {
    /// Milliseconds between readings.
    #[serde(default = "default_monitor_interval_ms")]
    pub interval_ms: u64,

    /// Topic label attached to each reading.
    #[serde(default = "default_monitor_topic")]
    pub topic: String,

    /// Field name -> node to read.
    #[serde(default = "default_monitor_nodes")]
    pub nodes: BTreeMap<String, NodeId>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_monitor_interval_ms(),
            topic: default_monitor_topic(),
            nodes: default_monitor_nodes(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error), used when `RUST_LOG`
    /// is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

fn default_server_name() -> String {
    "Industrial Simulation Server".to_owned()
}

fn default_endpoint() -> String {
    "opc.tcp://localhost:4840/freeopcua/server/".to_owned()
}

const fn default_tick_interval_ms() -> u64 {
    2_000
}

const fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig {
            name: "Sensor1_Temperature".to_owned(),
            baseline: 20.0,
            low: -2.0,
            high: 3.0,
        },
        SensorConfig {
            name: "Sensor2_Temperature".to_owned(),
            baseline: 25.0,
            low: -1.5,
            high: 2.5,
        },
        SensorConfig {
            name: "Sensor3_Temperature".to_owned(),
            baseline: 22.0,
            low: -1.0,
            high: 2.0,
        },
    ]
}

fn default_motors() -> Vec<MotorConfig> {
    vec![
        MotorConfig {
            name: "Motor1".to_owned(),
            speed_delta: 5.0,
            production_min: 1,
            production_max: 3,
        },
        MotorConfig {
            name: "Motor2".to_owned(),
            speed_delta: 3.0,
            production_min: 1,
            production_max: 2,
        },
    ]
}

const fn default_monitor_interval_ms() -> u64 {
    2_000
}

fn default_monitor_topic() -> String {
    "temperature".to_owned()
}

fn default_monitor_nodes() -> BTreeMap<String, NodeId> {
    let mut m = BTreeMap::new();
    m.insert("temp1".to_owned(), NodeId::new(2, 10));
    m.insert("temp2".to_owned(), NodeId::new(2, 11));
    m.insert("motor_speed".to_owned(), NodeId::new(2, 20));
    m.insert("motor_status".to_owned(), NodeId::new(2, 21));
    m
}

fn default_log_level() -> String {
    "info".to_owned()
}
