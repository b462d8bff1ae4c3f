use crate::ControlError;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Loop counters. Observability only; control never reads them.
#[derive(Clone)]
pub struct LoopMetrics {
    pub registry: Registry,
    pub cycles: IntCounter,
    pub point_reads: IntCounter,
    pub point_read_errors: IntCounter,
    pub controller_write_errors: IntCounter,
    pub telemetry_dropped: IntCounter,
    pub devices_loaded: IntGauge,
}

fn counter(name: &str, help: &str) -> Result<IntCounter, ControlError> {
    IntCounter::new(name, help).map_err(|e| ControlError::Metrics(e.to_string()))
}

impl LoopMetrics {
    pub fn new() -> Result<Self, ControlError> {
        let registry = Registry::new();
        let m = Self {
            cycles: counter("cem_cycles_total", "Control cycles completed")?,
            point_reads: counter("cem_point_reads_total", "Data point reads attempted")?,
            point_read_errors: counter("cem_point_read_errors_total", "Data point reads that failed")?,
            controller_write_errors: counter(
                "cem_controller_write_errors_total",
                "Controller steps that returned a non-zero write code",
            )?,
            telemetry_dropped: counter(
                "cem_telemetry_dropped_total",
                "Snapshots the sink failed to accept in time",
            )?,
            devices_loaded: IntGauge::new("cem_devices_loaded", "Devices in the fleet")
                .map_err(|e| ControlError::Metrics(e.to_string()))?,
            registry,
        };
        let collectors: [Box<dyn prometheus::core::Collector>; 6] = [
            Box::new(m.cycles.clone()),
            Box::new(m.point_reads.clone()),
            Box::new(m.point_read_errors.clone()),
            Box::new(m.controller_write_errors.clone()),
            Box::new(m.telemetry_dropped.clone()),
            Box::new(m.devices_loaded.clone()),
        ];
        for c in collectors {
            m.registry
                .register(c)
                .map_err(|e| ControlError::Metrics(e.to_string()))?;
        }
        Ok(m)
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_metrics() {
        let m = LoopMetrics::new().unwrap();
        m.cycles.inc();
        m.devices_loaded.set(4);
        let text = m.encode_text();
        assert!(text.contains("cem_cycles_total 1"));
        assert!(text.contains("cem_devices_loaded 4"));
        assert!(text.contains("cem_telemetry_dropped_total 0"));
    }
}
