use crate::commands::CommandTable;
use crate::error::{WRITE_NO_BACKEND, WRITE_UNSUPPORTED};
use crate::units::{is_current, is_power};
use crate::{Backend, ConfigError};
use futures::FutureExt;
use register_map::{DataPointKey, Reading};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

pub const NOMINAL_VOLTAGE: f64 = 230.0;

/// Target for per-point value logging of devices with logging enabled.
pub const DEVICE_LOG_TARGET: &str = "cem::device_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    PowerSensor,
    TemperatureSensor,
    RelaisActuator,
    HeatPump,
    #[serde(rename = "EVCharger")]
    EvCharger,
}

/// Kind-specific limits. Only the fields relevant to a kind are used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KindSettings {
    pub min_temp: f64,
    pub max_temp: f64,
    pub max_power_kw: f64,
    pub phases: u8,
}

impl Default for KindSettings {
    fn default() -> Self {
        Self {
            min_temp: -40.0,
            max_temp: 120.0,
            max_power_kw: 100.0,
            phases: 3,
        }
    }
}

/// Static description of one device, as produced by the configuration loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default)]
    pub monitored_points: Vec<DataPointKey>,
    #[serde(default)]
    pub logging_enabled: bool,
    #[serde(default)]
    pub nominal_power_kw: f64,
    #[serde(default)]
    pub settings: KindSettings,
    /// Overrides the kind's built-in command table.
    #[serde(default)]
    pub commands: Option<CommandTable>,
    /// Point carrying the device's power; defaults to the first power point.
    #[serde(default)]
    pub power_point: Option<DataPointKey>,
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            monitored_points: Vec::new(),
            logging_enabled: false,
            nominal_power_kw: 0.0,
            settings: KindSettings::default(),
            commands: None,
            power_point: None,
        }
    }

    pub fn point(mut self, fp: &str, dp: &str) -> Self {
        self.monitored_points.push(DataPointKey::new(fp, dp));
        self
    }

    pub fn nominal_power(mut self, kw: f64) -> Self {
        self.nominal_power_kw = kw;
        self
    }
}

/// Readings of one cycle in monitored-point order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    readings: Vec<(DataPointKey, Reading)>,
}

impl Snapshot {
    pub fn get(&self, key: &DataPointKey) -> Option<&Reading> {
        self.readings.iter().find(|(k, _)| k == key).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DataPointKey, &Reading)> {
        self.readings.iter().map(|(k, r)| (k, r))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.readings.iter().filter(|(_, r)| !r.is_ok()).count()
    }

    /// Snapshot with every point marked failed.
    pub fn all_failed<'a>(keys: impl IntoIterator<Item = &'a DataPointKey>) -> Self {
        Self {
            readings: keys.into_iter().map(|k| (k.clone(), Reading::error())).collect(),
        }
    }
}

pub struct Device {
    name: String,
    kind: DeviceKind,
    monitored: Vec<DataPointKey>,
    backend: Backend,
    logging_enabled: bool,
    nominal_power_kw: f64,
    settings: KindSettings,
    commands: CommandTable,
    power_point: Option<DataPointKey>,
    last_snapshot: Snapshot,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("points", &self.monitored.len())
            .finish()
    }
}

impl Device {
    /// Validate the configuration against the backend and build the device.
    pub fn new(config: DeviceConfig, backend: Backend) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for key in &config.monitored_points {
            if !seen.insert(key) {
                return Err(ConfigError::DuplicateKey(key.clone()));
            }
            if let Some(map) = backend.register_map() {
                if !map.contains(key) {
                    return Err(ConfigError::UnknownDataPoint(key.clone()));
                }
            }
        }
        if let Some(pp) = &config.power_point {
            if !seen.contains(pp) {
                return Err(ConfigError::MissingDataPoint {
                    device: config.name.clone(),
                    key: pp.clone(),
                });
            }
        }
        let power_point = config
            .power_point
            .clone()
            .or_else(|| default_power_point(&config.monitored_points, &backend, config.kind));
        let commands = config
            .commands
            .clone()
            .unwrap_or_else(|| CommandTable::for_kind(config.kind));
        Ok(Self {
            name: config.name,
            kind: config.kind,
            monitored: config.monitored_points,
            backend,
            logging_enabled: config.logging_enabled,
            nominal_power_kw: config.nominal_power_kw,
            settings: config.settings,
            commands,
            power_point,
            last_snapshot: Snapshot::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn monitored_points(&self) -> &[DataPointKey] {
        &self.monitored
    }

    pub fn monitors(&self, key: &DataPointKey) -> bool {
        self.monitored.contains(key)
    }

    pub fn nominal_power_kw(&self) -> f64 {
        self.nominal_power_kw
    }

    pub fn settings(&self) -> &KindSettings {
        &self.settings
    }

    pub fn power_point(&self) -> Option<&DataPointKey> {
        self.power_point.as_ref()
    }

    pub fn last_snapshot(&self) -> &Snapshot {
        &self.last_snapshot
    }

    /// Read every monitored point. A failing point is stored as an error
    /// reading; the snapshot is replaced only after all points were tried.
    pub async fn read(&mut self) -> &Snapshot {
        let mut readings = Vec::with_capacity(self.monitored.len());
        for key in &self.monitored {
            let attempt = AssertUnwindSafe(self.backend.read_value(key))
                .catch_unwind()
                .await;
            let reading = match attempt {
                Ok(r) => self.clamp(r),
                Err(_) => {
                    warn!(device = %self.name, %key, "backend panicked during read");
                    Reading::error()
                }
            };
            if self.logging_enabled {
                info!(target: DEVICE_LOG_TARGET, device = %self.name, %key,
                    value = reading.value, unit = %reading.unit, error_code = reading.error_code);
            } else {
                debug!(device = %self.name, %key, value = reading.value, unit = %reading.unit,
                    error_code = reading.error_code, "read");
            }
            readings.push((key.clone(), reading));
        }
        self.last_snapshot = Snapshot { readings };
        &self.last_snapshot
    }

    /// Replace the snapshot with error readings for every point.
    pub fn mark_failed(&mut self) {
        self.last_snapshot = Snapshot::all_failed(&self.monitored);
    }

    fn clamp(&self, r: Reading) -> Reading {
        if self.kind == DeviceKind::TemperatureSensor && r.is_ok() {
            let value = r.value.clamp(self.settings.min_temp, self.settings.max_temp);
            return Reading { value, ..r };
        }
        r
    }

    /// Turn the device on or off via its kind's switch point.
    pub async fn switch(&self, on: bool) -> i32 {
        if self.backend.is_none() {
            return WRITE_NO_BACKEND;
        }
        let Some(key) = &self.commands.switch else {
            warn!(device = %self.name, kind = ?self.kind, "switch not supported");
            return WRITE_UNSUPPORTED;
        };
        let code = self
            .backend
            .write_value(key, if on { 1.0 } else { 0.0 })
            .await;
        debug!(device = %self.name, on, code, "switch");
        code
    }

    /// Write the kind's setpoint. Heat pumps take °C; EV chargers take kW,
    /// converted to a current limit for the configured phase count.
    pub async fn write_setpoint(&self, value: f64) -> i32 {
        if self.backend.is_none() {
            return WRITE_NO_BACKEND;
        }
        let Some(key) = &self.commands.setpoint else {
            warn!(device = %self.name, kind = ?self.kind, "setpoint not supported");
            return WRITE_UNSUPPORTED;
        };
        let raw = match self.kind {
            DeviceKind::EvCharger => power_to_current(value, self.settings.phases),
            _ => value,
        };
        let code = self.backend.write_value(key, raw).await;
        debug!(device = %self.name, value, raw, code, "setpoint");
        code
    }

    /// Signed power of the last snapshot, in kW. `None` when the power point
    /// is missing or failed.
    pub fn power_kw(&self) -> Option<f64> {
        let key = self.power_point.as_ref()?;
        let r = self.last_snapshot.get(key)?;
        if !r.is_ok() {
            return None;
        }
        if self.kind == DeviceKind::EvCharger && is_current(&r.unit) {
            return Some(current_to_power(r.value, self.settings.phases));
        }
        Some(r.value)
    }

    /// Imported power clamped to `[0, max_power_kw]`.
    pub fn import_power_kw(&self) -> Option<f64> {
        self.power_kw()
            .map(|p| p.clamp(0.0, self.settings.max_power_kw.max(0.0)))
    }
}

fn default_power_point(points: &[DataPointKey], backend: &Backend, kind: DeviceKind) -> Option<DataPointKey> {
    let Some(map) = backend.register_map() else {
        return points.first().cloned();
    };
    points
        .iter()
        .find(|k| {
            map.entry(k).is_ok_and(|e| {
                let unit = crate::units::normalize(Reading::ok(0.0, e.unit.clone())).unit;
                is_power(&unit) || (kind == DeviceKind::EvCharger && is_current(&unit))
            })
        })
        .or_else(|| points.first())
        .cloned()
}

/// Single-phase `I = P / 230`, three-phase `I = P / (3 · 230)`; P in kW.
pub fn power_to_current(kw: f64, phases: u8) -> f64 {
    kw * 1000.0 / (f64::from(phases.max(1)) * NOMINAL_VOLTAGE)
}

pub fn current_to_power(amps: f64, phases: u8) -> f64 {
    amps * f64::from(phases.max(1)) * NOMINAL_VOLTAGE / 1000.0
}
