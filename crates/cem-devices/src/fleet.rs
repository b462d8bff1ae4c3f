use crate::{ConfigError, Device};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tracing::{error, warn};

/// Index of a device inside its fleet. Controllers hold these instead of
/// references, so devices stay owned by the fleet alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(usize);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Outcome of reading the whole fleet once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadReport {
    pub devices: usize,
    pub points: usize,
    pub point_errors: usize,
    /// Devices whose read panicked; their snapshots are all-error.
    pub failed_devices: Vec<String>,
}

/// All devices of one installation, in configuration order.
#[derive(Debug, Default)]
pub struct Fleet {
    devices: Vec<Device>,
    by_name: HashMap<String, DeviceId>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: Device) -> Result<DeviceId, ConfigError> {
        if self.by_name.contains_key(device.name()) {
            return Err(ConfigError::DuplicateDevice(device.name().to_string()));
        }
        let id = DeviceId(self.devices.len());
        self.by_name.insert(device.name().to_string(), id);
        self.devices.push(device);
        Ok(id)
    }

    pub fn id_of(&self, name: &str) -> Result<DeviceId, ConfigError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownDevice(name.to_string()))
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id.0)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    /// Read every device with at most `concurrency` reads in flight. A
    /// device that panics is marked failed; the others are unaffected.
    pub async fn read_all(&mut self, concurrency: usize) -> ReadReport {
        let reads: Vec<_> = self.devices.iter_mut().map(read_isolated).collect();
        let outcomes: Vec<(usize, usize, Option<String>)> = stream::iter(reads)
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = ReadReport {
            devices: outcomes.len(),
            ..Default::default()
        };
        for (points, errors, failed) in outcomes {
            report.points += points;
            report.point_errors += errors;
            report.failed_devices.extend(failed);
        }
        if report.point_errors > 0 {
            warn!(errors = report.point_errors, points = report.points, "fleet read had errors");
        }
        report
    }
}

/// Read one device; returns (points, errors, name if it panicked).
async fn read_isolated(dev: &mut Device) -> (usize, usize, Option<String>) {
    let res = AssertUnwindSafe(dev.read())
        .catch_unwind()
        .await
        .map(|snap| (snap.len(), snap.error_count()));
    match res {
        Ok((points, errors)) => (points, errors, None),
        Err(_) => {
            error!(device = %dev.name(), "device read panicked");
            dev.mark_failed();
            let n = dev.monitored_points().len();
            (n, n, Some(dev.name().to_string()))
        }
    }
}
