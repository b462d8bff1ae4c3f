//! Devices with scripted values for controller and loop tests.

use async_trait::async_trait;
use cem_devices::{
    Backend, DataPointHandle, Device, DeviceConfig, DeviceKind, DeviceLibraryClient, LibraryError,
    RuntimeContext, StandardizedBackend,
};
use register_map::DataPointKey;
use std::sync::{Arc, Mutex};

pub const POWER: (&str, &str) = ("ActivePowerAC", "ActivePowerACtot");

/// Library client whose every point reads a settable kW value and whose
/// writes are recorded.
#[derive(Default)]
pub struct FixedLibrary {
    value: Arc<Mutex<f64>>,
    writes: Arc<Mutex<Vec<(DataPointKey, f64)>>>,
    crash_on_write: bool,
}

impl FixedLibrary {
    pub fn new(kw: f64) -> Arc<Self> {
        let lib = Self::default();
        lib.set(kw);
        Arc::new(lib)
    }

    /// Reads like `new`, but every write panics inside the client.
    pub fn crashing_on_write(kw: f64) -> Arc<Self> {
        let lib = Self {
            crash_on_write: true,
            ..Self::default()
        };
        lib.set(kw);
        Arc::new(lib)
    }

    pub fn set(&self, kw: f64) {
        *self.value.lock().unwrap() = kw;
    }

    pub fn writes(&self) -> Vec<(DataPointKey, f64)> {
        self.writes.lock().unwrap().clone()
    }
}

struct FixedHandle {
    key: DataPointKey,
    value: Arc<Mutex<f64>>,
    writes: Arc<Mutex<Vec<(DataPointKey, f64)>>>,
    crash_on_write: bool,
}

#[async_trait]
impl DataPointHandle for FixedHandle {
    async fn get_value(&self) -> Result<(f64, String), LibraryError> {
        Ok((*self.value.lock().unwrap(), "kW".to_string()))
    }

    async fn set_value(&self, value: f64) -> Result<(), LibraryError> {
        if self.crash_on_write {
            panic!("client crashed writing {}", self.key);
        }
        self.writes.lock().unwrap().push((self.key.clone(), value));
        Ok(())
    }
}

#[async_trait]
impl DeviceLibraryClient for FixedLibrary {
    async fn data_point(&self, key: &DataPointKey) -> Result<Arc<dyn DataPointHandle>, LibraryError> {
        Ok(Arc::new(FixedHandle {
            key: key.clone(),
            value: self.value.clone(),
            writes: self.writes.clone(),
            crash_on_write: self.crash_on_write,
        }))
    }
}

pub fn device(name: &str, kind: DeviceKind, lib: &Arc<FixedLibrary>, nominal_kw: f64) -> Device {
    let cfg = DeviceConfig::new(name, kind)
        .point(POWER.0, POWER.1)
        .nominal_power(nominal_kw);
    let backend = StandardizedBackend::new(lib.clone(), &RuntimeContext::default());
    Device::new(cfg, Backend::Standardized(backend)).unwrap()
}
