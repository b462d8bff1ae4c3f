use anyhow::{Context, Result};
use cem_control::{ControllerConfig, LoopConfig};
use cem_devices::DeviceConfig;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Simulation backing of a configured device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationEntry {
    /// `PV_PLANT`, `HOUSEHOLD`, `MAIN_METER`, `HEAT_PUMP`, `EV_CHARGER`, `RELAIS`, `TEMPERATURE`
    pub model: String,
    #[serde(default)]
    pub rating_kw: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    #[serde(flatten)]
    pub config: DeviceConfig,
    /// Without a simulation the device has no backend; its writes return 3.
    #[serde(default)]
    pub simulation: Option<SimulationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CemSettings {
    pub loop_time_s: f64,
    pub simulation_speed_up: f64,
    /// Wall-clock run time; 0 runs until ctrl-c.
    pub duration_s: u64,
    pub io_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub read_concurrency: usize,
    pub log_level: String,
    pub seed: Option<u64>,
    pub telemetry_file: Option<PathBuf>,
    /// Empty means the built-in demo fleet.
    pub devices: Vec<DeviceEntry>,
    pub controllers: Vec<ControllerConfig>,
}

impl Default for CemSettings {
    fn default() -> Self {
        Self {
            loop_time_s: 10.0,
            simulation_speed_up: 1.0,
            duration_s: 0,
            io_timeout_ms: 5_000,
            publish_timeout_ms: 500,
            read_concurrency: 8,
            log_level: "info".to_string(),
            seed: None,
            telemetry_file: None,
            devices: Vec::new(),
            controllers: Vec::new(),
        }
    }
}

fn env_value(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid value {raw:?} for {name}: {e}"))
}

fn override_field<T>(field: &mut T, lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = env_value(lookup, name) {
        *field = parse_env(name, &raw)?;
    }
    Ok(())
}

impl CemSettings {
    /// Read settings from YAML; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing settings {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `CEM_*` overrides. Blank values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_field(&mut self.loop_time_s, &lookup, "CEM_LOOP_TIME_S")?;
        override_field(&mut self.simulation_speed_up, &lookup, "CEM_SIMULATION_SPEED_UP")?;
        override_field(&mut self.duration_s, &lookup, "CEM_DURATION_S")?;
        override_field(&mut self.io_timeout_ms, &lookup, "CEM_IO_TIMEOUT_MS")?;
        override_field(&mut self.publish_timeout_ms, &lookup, "CEM_PUBLISH_TIMEOUT_MS")?;
        override_field(&mut self.read_concurrency, &lookup, "CEM_READ_CONCURRENCY")?;
        override_field(&mut self.log_level, &lookup, "CEM_LOG_LEVEL")?;
        if let Some(raw) = env_value(&lookup, "CEM_SEED") {
            self.seed = Some(parse_env("CEM_SEED", &raw)?);
        }
        if let Some(raw) = env_value(&lookup, "CEM_TELEMETRY_FILE") {
            self.telemetry_file = Some(PathBuf::from(raw.trim()));
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.loop_time_s.is_finite() && self.loop_time_s > 0.0) {
            anyhow::bail!("loop_time_s must be positive, got {}", self.loop_time_s);
        }
        if !(self.simulation_speed_up.is_finite() && self.simulation_speed_up > 0.0) {
            anyhow::bail!(
                "simulation_speed_up must be positive, got {}",
                self.simulation_speed_up
            );
        }
        if self.read_concurrency == 0 {
            anyhow::bail!("read_concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            period: Duration::from_secs_f64(self.loop_time_s),
            read_concurrency: self.read_concurrency,
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cem_control::Policy;
    use cem_devices::DeviceKind;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join(format!("cem-missing-{}.yaml", uuid::Uuid::new_v4()));
        let s = CemSettings::load(&path).unwrap();
        assert_eq!(s.loop_time_s, 10.0);
        assert_eq!(s.read_concurrency, 8);
        assert!(s.devices.is_empty());
    }

    #[test]
    fn yaml_fields_and_fleet() {
        let s = CemSettings::from_yaml(
            r#"
loop_time_s: 5
simulation_speed_up: 60
seed: 7
devices:
  - name: main
    kind: PowerSensor
    monitored_points:
      - { functional_profile: ActivePowerAC, data_point: ActivePowerACtot }
    simulation: { model: MAIN_METER, rating_kw: 6 }
  - name: ev
    kind: EVCharger
    nominal_power_kw: 11
    simulation: { model: EV_CHARGER, rating_kw: 11 }
controllers:
  - name: ev_dynamic
    policy: { type: Dynamic }
    main_meter: main
    controlled_device: ev
    threshold_kw: 4.2
    hysteresis_kw: 0.5
"#,
        )
        .unwrap();
        assert_eq!(s.loop_time_s, 5.0);
        assert_eq!(s.seed, Some(7));
        assert_eq!(s.devices.len(), 2);
        assert_eq!(s.devices[1].config.kind, DeviceKind::EvCharger);
        assert_eq!(s.devices[0].simulation.as_ref().unwrap().model, "MAIN_METER");
        assert!(matches!(s.controllers[0].policy, Policy::Dynamic));
        assert_eq!(s.controllers[0].switching.threshold_kw, 4.2);
        // untouched fields keep their defaults
        assert_eq!(s.publish_timeout_ms, 500);
    }

    #[test]
    fn env_overrides_file_and_blank_falls_back() {
        let mut s = CemSettings::from_yaml("loop_time_s: 5\nlog_level: warn\n").unwrap();
        s.apply_env(env(&[
            ("CEM_LOOP_TIME_S", "2.5"),
            ("CEM_LOG_LEVEL", "   "),
            ("CEM_SEED", "42"),
        ]))
        .unwrap();
        assert_eq!(s.loop_time_s, 2.5);
        assert_eq!(s.log_level, "warn");
        assert_eq!(s.seed, Some(42));
        assert_eq!(s.simulation_speed_up, 1.0);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let mut s = CemSettings::default();
        let err = s
            .apply_env(env(&[("CEM_READ_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("CEM_READ_CONCURRENCY"));
    }

    #[test]
    fn non_positive_speed_is_rejected() {
        let mut s = CemSettings::default();
        assert!(s.apply_env(env(&[("CEM_SIMULATION_SPEED_UP", "0")])).is_err());
    }

    #[test]
    fn loop_config_follows_settings() {
        let s = CemSettings {
            loop_time_s: 0.5,
            publish_timeout_ms: 250,
            ..CemSettings::default()
        };
        let lc = s.loop_config();
        assert_eq!(lc.period, Duration::from_millis(500));
        assert_eq!(lc.publish_timeout, Duration::from_millis(250));
    }
}
