//! Periodic factory reading.
//!
//! Every `monitor.interval_ms` the monitor reads the configured nodes
//! through its session and publishes one [`FactoryReading`] as a JSON line
//! through `tracing`. A failed read is logged and skipped; a closed session
//! ends the monitor.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use plantsim_core::config::MonitorConfig;
use plantsim_core::{Session, SessionError};
use plantsim_types::{NodeId, Value};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// One reading of the monitored nodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactoryReading {
    /// Topic label from the monitor configuration.
    pub topic: String,
    /// Field name -> value read.
    pub data: BTreeMap<String, Value>,
    /// When the reading was taken.
    pub read_at: DateTime<Utc>,
}

/// Read every configured node in one group read.
///
/// # Errors
///
/// Returns [`SessionError::PartialRead`] if any node fails, or
/// [`SessionError::Closed`] if the session is gone.
pub fn take_reading(
    session: &Session,
    config: &MonitorConfig,
) -> Result<FactoryReading, SessionError> {
    let ids: Vec<NodeId> = config.nodes.values().copied().collect();
    let values = session.read_group(&ids)?;
    let data = config
        .nodes
        .iter()
        .filter_map(|(field, id)| values.get(id).map(|v| (field.clone(), *v)))
        .collect();
    Ok(FactoryReading {
        topic: config.topic.clone(),
        data,
        read_at: Utc::now(),
    })
}

/// Publish readings until `shutdown` fires or the session closes.
///
/// `publish` receives every successful reading; the binary passes a
/// closure that logs it.
pub async fn run_monitor<F>(
    session: Session,
    config: MonitorConfig,
    mut shutdown: oneshot::Receiver<()>,
    mut publish: F,
) where
    F: FnMut(&FactoryReading) + Send,
{
    let mut interval = tokio::time::interval(Duration::from_millis(config.interval_ms.max(1)));
    info!(
        session_id = %session.id(),
        interval_ms = config.interval_ms,
        topic = %config.topic,
        "Monitor started"
    );

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = interval.tick() => {
                match take_reading(&session, &config) {
                    Ok(reading) => publish(&reading),
                    Err(SessionError::Closed) => {
                        warn!("Monitor session closed, stopping monitor");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Factory reading failed"),
                }
            }
        }
    }

    session.close();
    info!("Monitor stopped");
}

/// Log a reading as a single JSON line.
pub fn log_reading(reading: &FactoryReading) {
    match serde_json::to_string(reading) {
        Ok(json) => info!(reading = %json, "Factory reading"),
        Err(e) => warn!(error = %e, "Failed to encode factory reading"),
    }
}
