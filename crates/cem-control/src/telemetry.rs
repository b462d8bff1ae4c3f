use crate::chain::{ChainOutcome, ControllerChain};
use crate::controller::Mode;
use crate::SinkError;
use async_trait::async_trait;
use cem_devices::Fleet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRecord {
    pub functional_profile: String,
    pub data_point: String,
    pub value: f64,
    pub unit: String,
    pub error_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerRecord {
    pub name: String,
    pub mode: Mode,
    pub excess_kw: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setpoint: Option<f64>,
}

/// Everything observed in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub run_id: Uuid,
    pub cycle: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    pub error_code: i32,
    pub budget_kw: Option<f64>,
    pub devices: BTreeMap<String, Vec<PointRecord>>,
    pub controllers: Vec<ControllerRecord>,
}

impl TelemetrySnapshot {
    pub fn assemble(
        run_id: Uuid,
        cycle: u64,
        fleet: &Fleet,
        chain: &ControllerChain,
        outcome: &ChainOutcome,
    ) -> Self {
        let devices = fleet
            .iter()
            .map(|dev| {
                let points = dev
                    .last_snapshot()
                    .iter()
                    .map(|(k, r)| PointRecord {
                        functional_profile: k.functional_profile.clone(),
                        data_point: k.data_point.clone(),
                        value: r.value,
                        unit: r.unit.clone(),
                        error_code: r.error_code,
                    })
                    .collect();
                (dev.name().to_string(), points)
            })
            .collect();
        let controllers = chain
            .controllers()
            .iter()
            .map(|c| ControllerRecord {
                name: c.name().to_string(),
                mode: c.mode(),
                excess_kw: c.excess(),
                setpoint: c.last_setpoint(),
            })
            .collect();
        Self {
            run_id,
            cycle,
            time: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
            error_code: outcome.error_code,
            budget_kw: outcome.budget,
            devices,
            controllers,
        }
    }
}

/// Receiver of one snapshot per cycle. Delivery is at most once.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), SinkError>;
}

/// Logs a one-line summary per cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn publish(&self, s: &TelemetrySnapshot) -> Result<(), SinkError> {
        let points: usize = s.devices.values().map(Vec::len).sum();
        let errors = s
            .devices
            .values()
            .flatten()
            .filter(|p| p.error_code != 0)
            .count();
        info!(run_id = %s.run_id, cycle = s.cycle, devices = s.devices.len(), points, errors,
            budget_kw = ?s.budget_kw, error_code = s.error_code, "telemetry");
        Ok(())
    }
}

/// Hands snapshots to a bounded channel, e.g. a message-bus bridge.
/// A full channel drops the snapshot instead of waiting.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<TelemetrySnapshot>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<TelemetrySnapshot>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TelemetrySink for ChannelSink {
    async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
        self.tx.try_send(snapshot.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Appends one JSON document per line.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TelemetrySink for JsonLinesSink {
    async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(snapshot)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
