//! Unit normalization applied once to every reading a backend produces.

use register_map::Reading;

pub const KW: &str = "kW";
pub const KWH: &str = "kWh";

const PRECISION: f64 = 10_000.0;

fn round4(v: f64) -> f64 {
    (v * PRECISION).round() / PRECISION
}

/// W becomes kW and Wh becomes kWh (value / 1000, rounded to 4 places).
/// Kilo-unit aliases are relabelled without touching the value, so
/// normalizing an already normalized reading is a no-op. Error readings
/// pass through unchanged.
pub fn normalize(reading: Reading) -> Reading {
    if !reading.is_ok() {
        return reading;
    }
    match reading.unit.as_str() {
        "W" | "WATT" | "WATTS" => Reading::ok(round4(reading.value / 1000.0), KW),
        "Wh" | "WATT_HOURS" => Reading::ok(round4(reading.value / 1000.0), KWH),
        "KILOWATT" | "KILOWATTS" | "KW" => Reading::ok(reading.value, KW),
        "KILOWATT_HOURS" | "KWH" => Reading::ok(reading.value, KWH),
        _ => reading,
    }
}

/// Units treated as electrical current by the EV charger conversion.
pub fn is_current(unit: &str) -> bool {
    matches!(unit, "A" | "AMPERE" | "AMPERES")
}

/// Units a power point may carry after normalization.
pub fn is_power(unit: &str) -> bool {
    unit == KW
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watts_become_kilowatts() {
        let r = normalize(Reading::ok(1234.56789, "W"));
        assert_eq!(r, Reading::ok(1.2346, KW));
        let r = normalize(Reading::ok(-5000.0, "WATT"));
        assert_eq!(r, Reading::ok(-5.0, KW));
        let r = normalize(Reading::ok(150_000.0, "WATT_HOURS"));
        assert_eq!(r, Reading::ok(150.0, KWH));
    }

    #[test]
    fn normalized_readings_are_unchanged() {
        for r in [Reading::ok(1.23456789, KW), Reading::ok(7.0, KWH)] {
            assert_eq!(normalize(r.clone()), r);
        }
        let once = normalize(Reading::ok(987.0, "W"));
        assert_eq!(normalize(once.clone()), once);
    }

    #[test]
    fn same_input_same_output() {
        let a = normalize(Reading::ok(3333.33333, "W"));
        let b = normalize(Reading::ok(3333.33333, "W"));
        assert_eq!(a, b);
    }

    #[test]
    fn aliases_and_errors() {
        assert_eq!(normalize(Reading::ok(2.0, "KILOWATT")).unit, KW);
        assert_eq!(normalize(Reading::ok(21.5, "DEGREES_CELSIUS")).value, 21.5);
        assert_eq!(normalize(Reading::error()), Reading::error());
    }
}
