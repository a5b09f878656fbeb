//! End-to-end tests: a running server, its tick thread, and concurrent
//! sessions.
//!
//! Every server here ticks every 10 ms with a fixed seed so the tests run
//! quickly; assertions only rely on the documented bounds of each rule.

#![allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use plantsim_core::{
    EndpointConfig, EngineState, PlantConfig, ServerLifecycle, Session, SessionError,
    StopOutcome,
};
use plantsim_types::{NodeId, Value, ValueType};

const SENSOR_1: NodeId = NodeId::new(2, 10);
const MOTOR_1_SPEED: NodeId = NodeId::new(2, 20);
const MOTOR_1_STATUS: NodeId = NodeId::new(2, 21);
const UPTIME: NodeId = NodeId::new(2, 30);
const TOTAL_PRODUCTION: NodeId = NodeId::new(2, 31);

fn fast_config() -> PlantConfig {
    let mut config = PlantConfig::default();
    config.simulation.tick_interval_ms = 10;
    config.simulation.shutdown_timeout_ms = 2_000;
    config.simulation.seed = Some(2024);
    config
}

fn start(config: PlantConfig) -> (ServerLifecycle, Session) {
    let endpoint = EndpointConfig::from_server(&config.server);
    let mut server = ServerLifecycle::new(config);
    server.start().unwrap();
    let session = Session::open(&server, &endpoint).unwrap();
    (server, session)
}

fn int(session: &Session, id: NodeId) -> i64 {
    session.read_value(id).unwrap().as_int().unwrap()
}

fn wait_for_uptime(session: &Session, at_least: i64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while int(session, UPTIME) < at_least {
        assert!(Instant::now() < deadline, "engine did not reach uptime {at_least}");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn sensor_one_reads_within_its_band() {
    let (_server, session) = start(fast_config());
    wait_for_uptime(&session, 1);
    for _ in 0..20 {
        let t = session.read_value(SENSOR_1).unwrap().as_float().unwrap();
        assert!((18.0..=23.0).contains(&t), "temperature {t} out of range");
        thread::sleep(Duration::from_millis(3));
    }
}

#[test]
fn stopped_motor_holds_its_speed() {
    let (_server, session) = start(fast_config());
    session.write_value(MOTOR_1_SPEED, Value::Int(10)).unwrap();
    let base = int(&session, UPTIME);
    wait_for_uptime(&session, base + 5);
    assert_eq!(int(&session, MOTOR_1_SPEED), 10);
}

#[test]
fn running_motor_drifts_by_at_most_delta_per_tick() {
    let (server, session) = start(fast_config());
    let engine = server.engine().unwrap();
    engine.stop();
    session.write_value(MOTOR_1_SPEED, Value::Int(10)).unwrap();
    session.write_value(MOTOR_1_STATUS, Value::Bool(true)).unwrap();
    let before = int(&session, TOTAL_PRODUCTION);

    engine.tick_once().unwrap();

    let speed = int(&session, MOTOR_1_SPEED);
    assert!((5..=15).contains(&speed), "speed {speed} out of range");
    let produced = int(&session, TOTAL_PRODUCTION) - before;
    assert!((1..=3).contains(&produced), "produced {produced} out of range");
}

#[test]
fn counters_never_decrease_while_motors_run() {
    let (_server, session) = start(fast_config());
    session.write_value(MOTOR_1_STATUS, Value::Bool(true)).unwrap();
    session.write_value(NodeId::new(2, 23), Value::Bool(true)).unwrap();

    let mut last = (int(&session, UPTIME), int(&session, TOTAL_PRODUCTION));
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        let now = (int(&session, UPTIME), int(&session, TOTAL_PRODUCTION));
        assert!(now.0 >= last.0);
        assert!(now.1 >= last.1);
        last = now;
    }
    assert!(last.1 > 0);
}

#[test]
fn engine_restart_continues_uptime() {
    let (server, session) = start(fast_config());
    wait_for_uptime(&session, 3);
    let engine = server.engine().unwrap();
    assert_eq!(engine.stop(), StopOutcome::Acknowledged);
    let paused_at = int(&session, UPTIME);

    engine.start().unwrap();
    wait_for_uptime(&session, paused_at + 2);
    assert_eq!(engine.state(), EngineState::Running);
}

#[test]
fn concurrent_sessions_see_whole_values_of_the_declared_type() {
    let (server, _session) = start(fast_config());
    let server = Arc::new(server);
    let endpoint = EndpointConfig::from_server(&server.config().server);

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let session = Session::open(&server, &endpoint).unwrap();
            thread::spawn(move || {
                for _ in 0..200 {
                    let values = session
                        .read_group(&[SENSOR_1, MOTOR_1_SPEED, MOTOR_1_STATUS, UPTIME])
                        .unwrap();
                    assert_eq!(values.len(), 4);
                    assert_eq!(values[&SENSOR_1].value_type(), ValueType::Float);
                    assert_eq!(values[&MOTOR_1_STATUS].value_type(), ValueType::Bool);
                    assert_eq!(values[&UPTIME].value_type(), ValueType::Int);
                }
            })
        })
        .collect();

    let writer = Session::open(&server, &endpoint).unwrap();
    for i in 0..200 {
        writer
            .write_value(MOTOR_1_STATUS, Value::Bool(i % 2 == 0))
            .unwrap();
    }

    for reader in readers {
        reader.join().unwrap();
    }
}

#[test]
fn sessions_close_when_the_server_stops() {
    let (mut server, session) = start(fast_config());
    assert!(session.is_open());
    assert_eq!(server.stop(), StopOutcome::Acknowledged);
    assert_eq!(session.read_value(UPTIME).unwrap_err(), SessionError::Closed);
    assert_eq!(session.read_group(&[UPTIME]).unwrap_err(), SessionError::Closed);

    let endpoint = EndpointConfig::from_server(&server.config().server);
    assert!(Session::open(&server, &endpoint).is_err());
}

#[test]
fn two_servers_are_independent() {
    let (_a, session_a) = start(fast_config());
    let (b, session_b) = start(fast_config());
    b.engine().unwrap().stop();

    session_a.write_value(MOTOR_1_SPEED, Value::Int(77)).unwrap();
    assert_eq!(int(&session_b, MOTOR_1_SPEED), 0);
}
