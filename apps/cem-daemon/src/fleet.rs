//! Builds the device fleet and controller chain the daemon runs.

use crate::config::{DeviceEntry, SimulationEntry};
use anyhow::{Context, Result};
use cem_control::{ControllerConfig, Policy, SwitchingSettings, TemperatureSettings};
use cem_devices::{
    Backend, Device, DeviceConfig, DeviceKind, Fleet, RuntimeContext, SimModel, SimulatedBackend,
};
use tracing::info;

const POWER: (&str, &str) = ("ActivePowerAC", "ActivePowerACtot");
const MAIN_METER: &str = "main_meter";

fn sim(model: &str, rating_kw: f64) -> Option<SimulationEntry> {
    Some(SimulationEntry {
        model: model.to_string(),
        rating_kw,
    })
}

fn entry(config: DeviceConfig, simulation: Option<SimulationEntry>) -> DeviceEntry {
    DeviceEntry { config, simulation }
}

/// A household with PV, a heat pump, an EV charger and a heating rod relay.
pub fn demo_devices() -> Vec<DeviceEntry> {
    let (fp, dp) = POWER;
    let mut main = DeviceConfig::new(MAIN_METER, DeviceKind::PowerSensor).point(fp, dp);
    main.logging_enabled = true;
    vec![
        entry(main, sim("MAIN_METER", 9.0)),
        entry(
            DeviceConfig::new("pv_plant", DeviceKind::PowerSensor).point(fp, dp),
            sim("PV_PLANT", 9.0),
        ),
        entry(
            DeviceConfig::new("ev_charger", DeviceKind::EvCharger)
                .point(fp, dp)
                .nominal_power(11.0),
            sim("EV_CHARGER", 11.0),
        ),
        entry(
            DeviceConfig::new("heat_pump", DeviceKind::HeatPump)
                .point(fp, dp)
                .nominal_power(2.0),
            sim("HEAT_PUMP", 2.0),
        ),
        entry(
            DeviceConfig::new("heating_rod", DeviceKind::RelaisActuator)
                .point("RelaisCtrl_1", "RelaisState")
                .nominal_power(1.5),
            sim("RELAIS", 1.5),
        ),
        entry(
            DeviceConfig::new("buffer_tank", DeviceKind::TemperatureSensor)
                .point("TemperatureSensor", "ActTemp"),
            sim("TEMPERATURE", 0.0),
        ),
    ]
}

fn controller(name: &str, policy: Policy, target: &str, threshold_kw: f64, hysteresis_kw: f64) -> ControllerConfig {
    ControllerConfig {
        name: name.to_string(),
        policy,
        main_meter: MAIN_METER.to_string(),
        device_meter: None,
        controlled_device: target.to_string(),
        switching: SwitchingSettings {
            threshold_kw,
            hysteresis_kw,
        },
    }
}

/// Priority order: charger first, then the heat pump, then the heating rod.
pub fn demo_controllers() -> Vec<ControllerConfig> {
    vec![
        // 6 A on three phases is the smallest charge the charger accepts
        controller("ev_excess", Policy::Dynamic, "ev_charger", 4.2, 0.5),
        controller(
            "heat_pump_excess",
            Policy::Temperature(TemperatureSettings {
                eco_temp: 45.0,
                comfort_temp: 50.0,
                max_temp: 55.0,
                excess_comfort_kw: 1.0,
                excess_max_kw: 3.0,
            }),
            "heat_pump",
            1.0,
            0.3,
        ),
        controller("heating_rod_excess", Policy::Switching, "heating_rod", 1.5, 0.3),
    ]
}

fn backend_for(entry: &DeviceEntry, ctx: &RuntimeContext, salt: u64) -> Result<Backend> {
    let Some(sim) = &entry.simulation else {
        return Ok(Backend::None);
    };
    let model = SimModel::from_name(&sim.model, sim.rating_kw)?;
    Ok(Backend::Simulated(SimulatedBackend::new(model, ctx, salt)))
}

pub fn build_fleet(entries: &[DeviceEntry], ctx: &RuntimeContext) -> Result<Fleet> {
    let mut fleet = Fleet::new();
    for (i, entry) in entries.iter().enumerate() {
        let name = &entry.config.name;
        let backend =
            backend_for(entry, ctx, i as u64).with_context(|| format!("device {name}"))?;
        let device =
            Device::new(entry.config.clone(), backend).with_context(|| format!("device {name}"))?;
        fleet.add(device)?;
        info!(device = %name, kind = ?entry.config.kind,
            simulation = entry.simulation.as_ref().map(|s| s.model.as_str()), "device loaded");
    }
    Ok(fleet)
}
