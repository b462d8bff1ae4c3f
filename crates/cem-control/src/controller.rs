use crate::ControlError;
use cem_devices::{DeviceId, DeviceKind, Fleet, WRITE_OK};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Off,
    On,
}

/// ON above `threshold_kw`, OFF below `threshold_kw - hysteresis_kw`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwitchingSettings {
    pub threshold_kw: f64,
    #[serde(default)]
    pub hysteresis_kw: f64,
}

/// Excess-to-setpoint mapping of the temperature controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSettings {
    pub eco_temp: f64,
    pub comfort_temp: f64,
    pub max_temp: f64,
    pub excess_comfort_kw: f64,
    pub excess_max_kw: f64,
}

impl TemperatureSettings {
    /// Eco below `excess_comfort_kw`, then linear from comfort to max,
    /// clamped to `[comfort_temp, max_temp]`.
    pub fn setpoint(&self, excess: f64) -> f64 {
        if excess < self.excess_comfort_kw {
            return self.eco_temp;
        }
        let span = self.excess_max_kw - self.excess_comfort_kw;
        if span <= 0.0 {
            return self.max_temp;
        }
        let t = self.comfort_temp
            + (excess - self.excess_comfort_kw) * (self.max_temp - self.comfort_temp) / span;
        t.clamp(self.comfort_temp, self.max_temp)
    }

    fn validate(&self) -> Result<(), String> {
        if !(self.eco_temp <= self.comfort_temp && self.comfort_temp <= self.max_temp) {
            return Err("need eco_temp <= comfort_temp <= max_temp".to_string());
        }
        if self.excess_comfort_kw > self.excess_max_kw {
            return Err("need excess_comfort_kw <= excess_max_kw".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Policy {
    /// Switch the device on and off with the excess.
    Switching,
    /// Switching, plus ask the device to consume exactly the excess.
    Dynamic,
    /// Keep the device on and move its temperature setpoint with the excess.
    Temperature(TemperatureSettings),
}

/// Controller wiring by device name, resolved against a fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub name: String,
    pub policy: Policy,
    pub main_meter: String,
    #[serde(default)]
    pub device_meter: Option<String>,
    pub controlled_device: String,
    #[serde(flatten)]
    pub switching: SwitchingSettings,
}

/// Result of one controller step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Last non-zero write code of this step, or 0.
    pub error_code: i32,
    /// Budget left for the next controller.
    pub budget: f64,
}

#[derive(Debug, Clone)]
pub struct Controller {
    name: String,
    policy: Policy,
    main_meter: DeviceId,
    device_meter: Option<DeviceId>,
    controlled: DeviceId,
    settings: SwitchingSettings,
    mode: Mode,
    excess: f64,
    last_setpoint: Option<f64>,
}

fn invalid(controller: &str, reason: impl Into<String>) -> ControlError {
    ControlError::InvalidSettings {
        controller: controller.to_string(),
        reason: reason.into(),
    }
}

impl Controller {
    /// Resolve device names and check that every meter is a power sensor
    /// monitoring its power point.
    pub fn from_config(cfg: &ControllerConfig, fleet: &Fleet) -> Result<Self, ControlError> {
        let s = cfg.switching;
        if !(s.threshold_kw.is_finite() && s.hysteresis_kw.is_finite()) || s.hysteresis_kw < 0.0 {
            return Err(invalid(&cfg.name, "threshold and hysteresis must be finite, hysteresis >= 0"));
        }
        if let Policy::Temperature(t) = &cfg.policy {
            t.validate().map_err(|reason| invalid(&cfg.name, reason))?;
        }
        let main_meter = fleet.id_of(&cfg.main_meter)?;
        let device_meter = cfg
            .device_meter
            .as_deref()
            .map(|n| fleet.id_of(n))
            .transpose()?;
        let controlled = fleet.id_of(&cfg.controlled_device)?;

        for id in std::iter::once(main_meter).chain(device_meter) {
            let Some(dev) = fleet.get(id) else {
                continue;
            };
            if dev.kind() != DeviceKind::PowerSensor {
                return Err(invalid(&cfg.name, format!("{} is not a power sensor", dev.name())));
            }
            match dev.power_point() {
                Some(pp) if dev.monitors(pp) => {}
                _ => {
                    return Err(ControlError::NoPowerPoint {
                        controller: cfg.name.clone(),
                        device: dev.name().to_string(),
                    })
                }
            }
        }

        Ok(Self {
            name: cfg.name.clone(),
            policy: cfg.policy,
            main_meter,
            device_meter,
            controlled,
            settings: s,
            mode: Mode::Off,
            excess: 0.0,
            last_setpoint: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn excess(&self) -> f64 {
        self.excess
    }

    pub fn last_setpoint(&self) -> Option<f64> {
        self.last_setpoint
    }

    pub fn controlled_device(&self) -> DeviceId {
        self.controlled
    }

    /// One cycle of this controller. `budget` is `None` for the first
    /// controller of a chain, which derives it from the main meter.
    pub async fn step(&mut self, fleet: &Fleet, budget: Option<f64>) -> StepOutcome {
        let excess = match budget {
            Some(b) => b.max(0.0),
            None => match fleet.get(self.main_meter).and_then(|m| m.power_kw()) {
                Some(p) => (-p).max(0.0),
                None => {
                    warn!(controller = %self.name, "main meter reading unavailable, assuming no excess");
                    0.0
                }
            },
        };
        self.excess = excess;

        let Some(device) = fleet.get(self.controlled) else {
            return StepOutcome {
                error_code: cem_devices::WRITE_NO_BACKEND,
                budget: excess,
            };
        };

        let mut error_code = WRITE_OK;
        let mut record = |code: i32| {
            if code != WRITE_OK {
                error_code = code;
            }
        };

        let next = match self.policy {
            Policy::Temperature(_) => Mode::On,
            _ => next_mode(self.mode, excess, &self.settings),
        };
        if next != self.mode {
            let code = device.switch(next == Mode::On).await;
            info!(controller = %self.name, device = %device.name(), from = ?self.mode, to = ?next,
                excess, code, "mode change");
            record(code);
            self.mode = next;
        }

        match self.policy {
            Policy::Switching => {}
            Policy::Dynamic => {
                if excess > self.settings.threshold_kw {
                    record(device.write_setpoint(excess).await);
                    self.last_setpoint = Some(excess);
                }
            }
            Policy::Temperature(t) => {
                let sp = t.setpoint(excess);
                record(device.write_setpoint(sp).await);
                self.last_setpoint = Some(sp);
            }
        }

        let own = match self.device_meter {
            Some(id) => fleet.get(id).and_then(|m| m.import_power_kw()).unwrap_or(0.0),
            None if self.mode == Mode::On => device.nominal_power_kw().max(0.0),
            None => 0.0,
        };
        let remaining = (excess - own).max(0.0);
        debug!(controller = %self.name, excess, own, budget = remaining, mode = ?self.mode,
            error_code, "step");
        StepOutcome {
            error_code,
            budget: remaining,
        }
    }
}

/// Hysteresis transition; holds the mode inside the band.
pub fn next_mode(mode: Mode, excess: f64, s: &SwitchingSettings) -> Mode {
    match mode {
        Mode::Off if excess > s.threshold_kw => Mode::On,
        Mode::On if excess < s.threshold_kw - s.hysteresis_kw => Mode::Off,
        m => m,
    }
}
