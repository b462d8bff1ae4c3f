//! cem-devices: energy devices, their communication backends and the
//! per-cycle snapshot they produce.

pub use register_map::ConfigError;

mod error;
pub use error::{LibraryError, WRITE_COMM_ERROR, WRITE_NO_BACKEND, WRITE_OK, WRITE_UNSUPPORTED};

pub mod units;

mod context;
pub use context::{RuntimeContext, SimClock};

mod commands;
pub use commands::{is_switch_point, CommandTable};

mod backend;
pub use backend::{
    Backend, DataPointHandle, DeviceLibraryClient, NativeBackend, NativeTransport,
    StandardizedBackend,
};

mod sim;
pub use sim::{SimModel, SimulatedBackend};

mod device;
pub use device::{
    current_to_power, power_to_current, Device, DeviceConfig, DeviceKind, KindSettings, Snapshot,
    DEVICE_LOG_TARGET, NOMINAL_VOLTAGE,
};

mod fleet;
pub use fleet::{DeviceId, Fleet, ReadReport};
