//! Simulated devices for demos and tests without hardware.
//!
//! Every model answers any data point with the same model value; the key is
//! only consulted on writes, to tell on/off commands from setpoints.

use crate::commands::is_switch_point;
use crate::error::WRITE_OK;
use crate::units::KW;
use crate::{current_to_power, ConfigError, RuntimeContext};
use rand::rngs::StdRng;
use rand::Rng;
use register_map::{DataPointKey, Reading};
use std::f64::consts::PI;
use std::sync::Mutex;
use tracing::trace;

const HOUSEHOLD_BASE_KW: f64 = 0.8;
const BASE_TEMP_C: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimModel {
    /// Negative (exported) power on a daylight half-sine.
    PvPlant { peak_kw: f64 },
    Household { base_kw: f64 },
    /// Household load plus PV production at the grid connection.
    MainMeter { base_kw: f64, pv_peak_kw: f64 },
    HeatPump { nominal_kw: f64 },
    EvCharger { max_kw: f64, phases: u8 },
    Relais,
    Temperature { base_c: f64 },
}

impl SimModel {
    /// Model by its configuration name. `rating_kw` is the model's
    /// characteristic power (PV peak, base load, nominal or max power).
    pub fn from_name(name: &str, rating_kw: f64) -> Result<Self, ConfigError> {
        Ok(match name {
            "PV_PLANT" => Self::PvPlant { peak_kw: rating_kw },
            "HOUSEHOLD" => Self::Household { base_kw: rating_kw },
            "MAIN_METER" => Self::MainMeter {
                base_kw: HOUSEHOLD_BASE_KW,
                pv_peak_kw: rating_kw,
            },
            "HEAT_PUMP" => Self::HeatPump { nominal_kw: rating_kw },
            "EV_CHARGER" => Self::EvCharger {
                max_kw: rating_kw,
                phases: 3,
            },
            "RELAIS" => Self::Relais,
            "TEMPERATURE" => Self::Temperature { base_c: BASE_TEMP_C },
            other => return Err(ConfigError::UnknownSimulationModel(other.to_string())),
        })
    }
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    on: bool,
    setpoint: Option<f64>,
}

#[derive(Debug)]
pub struct SimulatedBackend {
    model: SimModel,
    ctx: RuntimeContext,
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    pub fn new(model: SimModel, ctx: &RuntimeContext, salt: u64) -> Self {
        Self {
            model,
            ctx: ctx.clone(),
            state: Mutex::new(SimState {
                rng: ctx.rng(salt),
                on: false,
                setpoint: None,
            }),
        }
    }

    pub fn model(&self) -> SimModel {
        self.model
    }

    pub(crate) fn read(&self, key: &DataPointKey) -> Reading {
        let Ok(mut st) = self.state.lock() else {
            return Reading::error();
        };
        let hour = self.ctx.clock().hour_of_day();
        let reading = match self.model {
            SimModel::PvPlant { peak_kw } => Reading::ok(pv_power(peak_kw, hour, &mut st.rng), KW),
            SimModel::Household { base_kw } => Reading::ok(household(base_kw, &mut st.rng), KW),
            SimModel::MainMeter { base_kw, pv_peak_kw } => {
                let p = household(base_kw, &mut st.rng) + pv_power(pv_peak_kw, hour, &mut st.rng);
                Reading::ok(p, KW)
            }
            SimModel::HeatPump { nominal_kw } => {
                let p = if st.on {
                    nominal_kw * st.rng.gen_range(0.95..1.05)
                } else {
                    0.0
                };
                Reading::ok(p, KW)
            }
            SimModel::EvCharger { max_kw, phases } => {
                let p = if st.on {
                    st.setpoint
                        .map(|amps| current_to_power(amps, phases))
                        .unwrap_or(max_kw)
                        .clamp(0.0, max_kw)
                } else {
                    0.0
                };
                Reading::ok(p, KW)
            }
            SimModel::Relais => Reading::ok(if st.on { 1.0 } else { 0.0 }, "NONE"),
            SimModel::Temperature { base_c } => {
                let t = base_c
                    + 2.0 * (2.0 * PI * (hour - 9.0) / 24.0).sin()
                    + st.rng.gen_range(-0.1..0.1);
                Reading::ok(t, "DEGREES_CELSIUS")
            }
        };
        trace!(%key, value = reading.value, "simulated read");
        reading
    }

    pub(crate) fn write(&self, key: &DataPointKey, value: f64) -> i32 {
        let Ok(mut st) = self.state.lock() else {
            return crate::error::WRITE_COMM_ERROR;
        };
        if is_switch_point(key) {
            st.on = value != 0.0;
        } else {
            st.setpoint = Some(value);
        }
        WRITE_OK
    }
}

fn pv_power(peak_kw: f64, hour: f64, rng: &mut StdRng) -> f64 {
    if !(6.0..18.0).contains(&hour) {
        return 0.0;
    }
    let shape = (PI * (hour - 6.0) / 12.0).sin();
    -(peak_kw * shape * rng.gen_range(0.97..1.03)).max(0.0)
}

fn household(base_kw: f64, rng: &mut StdRng) -> f64 {
    base_kw * rng.gen_range(0.8..1.2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fp: &str, dp: &str) -> DataPointKey {
        DataPointKey::new(fp, dp)
    }

    #[test]
    fn unknown_model_is_config_error() {
        assert_eq!(
            SimModel::from_name("WIND", 1.0),
            Err(ConfigError::UnknownSimulationModel("WIND".to_string()))
        );
    }

    #[tokio::test]
    async fn pv_exports_at_noon_and_is_idle_at_night() {
        let noon = RuntimeContext::new(1.0).with_start_of_day(12.0 * 3600.0);
        let pv = SimulatedBackend::new(SimModel::PvPlant { peak_kw: 5.0 }, &noon, 1);
        let r = pv.read(&key("ActivePowerAC", "ActivePowerACtot"));
        assert!(r.value < -4.5 && r.value > -5.5, "{}", r.value);

        let night = RuntimeContext::new(1.0).with_start_of_day(2.0 * 3600.0);
        let pv = SimulatedBackend::new(SimModel::PvPlant { peak_kw: 5.0 }, &night, 1);
        assert_eq!(pv.read(&key("A", "B")).value, 0.0);
    }

    #[tokio::test]
    async fn switchable_load_follows_commands() {
        let ctx = RuntimeContext::new(1.0).with_seed(Some(3));
        let ev = SimulatedBackend::new(SimModel::EvCharger { max_kw: 11.0, phases: 3 }, &ctx, 2);
        let power = key("ActivePowerAC", "ActivePowerACtot");
        assert_eq!(ev.read(&power).value, 0.0);
        assert_eq!(ev.write(&key("EVChargingCtrl", "ChargingEnable"), 1.0), WRITE_OK);
        assert_eq!(ev.read(&power).value, 11.0);
        ev.write(&key("EVChargingCtrl", "HemsCurrentLimit"), 10.0);
        assert!((ev.read(&power).value - 6.9).abs() < 1e-9);
        ev.write(&key("EVChargingCtrl", "ChargingEnable"), 0.0);
        assert_eq!(ev.read(&power).value, 0.0);
    }

    #[tokio::test]
    async fn seeded_models_repeat() {
        let ctx = RuntimeContext::new(1.0).with_seed(Some(11));
        let a = SimulatedBackend::new(SimModel::Household { base_kw: 1.0 }, &ctx, 5);
        let b = SimulatedBackend::new(SimModel::Household { base_kw: 1.0 }, &ctx, 5);
        let k = key("A", "B");
        assert_eq!(a.read(&k), b.read(&k));
    }
}
