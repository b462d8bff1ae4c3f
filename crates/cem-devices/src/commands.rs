use crate::DeviceKind;
use register_map::DataPointKey;
use serde::{Deserialize, Serialize};

/// Data points a device kind uses for its semantic operations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTable {
    /// Written with 1 (on) or 0 (off).
    #[serde(default)]
    pub switch: Option<DataPointKey>,
    /// Written with the setpoint in the device's own unit (°C, A).
    #[serde(default)]
    pub setpoint: Option<DataPointKey>,
}

const HEAT_PUMP_SWITCH: (&str, &str) = ("HeatPumpBase", "HPOpModeCmd");
const HEAT_PUMP_SETPOINT: (&str, &str) = ("HeatCoolCtrl_1", "SupplyWaterTempSetpointComfort");
const EV_SWITCH: (&str, &str) = ("EVChargingCtrl", "ChargingEnable");
const EV_SETPOINT: (&str, &str) = ("EVChargingCtrl", "HemsCurrentLimit");
const RELAIS_SWITCH: (&str, &str) = ("RelaisCtrl_1", "RelaisState");

fn key((fp, dp): (&str, &str)) -> DataPointKey {
    DataPointKey::new(fp, dp)
}

impl CommandTable {
    pub fn for_kind(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::HeatPump => Self {
                switch: Some(key(HEAT_PUMP_SWITCH)),
                setpoint: Some(key(HEAT_PUMP_SETPOINT)),
            },
            DeviceKind::EvCharger => Self {
                switch: Some(key(EV_SWITCH)),
                setpoint: Some(key(EV_SETPOINT)),
            },
            DeviceKind::RelaisActuator => Self {
                switch: Some(key(RELAIS_SWITCH)),
                setpoint: None,
            },
            DeviceKind::PowerSensor | DeviceKind::TemperatureSensor => Self::default(),
        }
    }
}

/// Whether `key` is an on/off command in any built-in table.
pub fn is_switch_point(key: &DataPointKey) -> bool {
    [HEAT_PUMP_SWITCH, EV_SWITCH, RELAIS_SWITCH]
        .iter()
        .any(|(fp, dp)| key.functional_profile == *fp && key.data_point == *dp)
}
