use register_map::ConfigError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("controller {controller}: {reason}")]
    InvalidSettings { controller: String, reason: String },
    #[error("controller {controller}: meter {device} has no monitored power point")]
    NoPowerPoint { controller: String, device: String },
    #[error("control loop is {0:?}; cannot start")]
    NotStartable(crate::LoopState),
    #[error("control loop task failed: {0}")]
    TaskFailed(String),
    #[error("metrics: {0}")]
    Metrics(String),
}

/// Failure of one telemetry publish. Logged and counted, never fatal.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,
    #[error("sink full, snapshot dropped")]
    Full,
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
