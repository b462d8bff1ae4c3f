//! cem-control: excess-power controllers, the controller chain, and the
//! periodic control loop that drives devices and emits telemetry.

mod error;
pub use error::{ControlError, SinkError};

mod controller;
pub use controller::{
    next_mode, Controller, ControllerConfig, Mode, Policy, StepOutcome, SwitchingSettings,
    TemperatureSettings,
};

mod chain;
pub use chain::{ChainOutcome, ControllerChain};

mod telemetry;
pub use telemetry::{
    ChannelSink, ControllerRecord, JsonLinesSink, LogSink, PointRecord, TelemetrySink,
    TelemetrySnapshot,
};

mod metrics;
pub use metrics::LoopMetrics;

mod control_loop;
pub use control_loop::{ControlLoop, LoopConfig, LoopState};

#[cfg(test)]
mod testing;
