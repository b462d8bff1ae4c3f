use crate::DataPointKey;
use cem_transport::TransportError;
use thiserror::Error;

/// Fatal configuration problems. Raised only while compiling descriptors or
/// wiring devices at startup, never retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown data point: {0}")]
    UnknownDataPoint(DataPointKey),
    #[error("duplicate data point: {0}")]
    DuplicateKey(DataPointKey),
    #[error("unsupported interface type: {0}")]
    UnsupportedInterface(String),
    #[error("unresolved placeholder: _{0}_")]
    UnresolvedPlaceholder(String),
    #[error("scaling factor of 0 for {0}")]
    ZeroScaling(DataPointKey),
    #[error("invalid address for {key}: {reason}")]
    InvalidAddress { key: DataPointKey, reason: String },
    #[error("invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },
    #[error("missing field `{field}` for {key}")]
    MissingField { key: DataPointKey, field: &'static str },
    #[error("descriptor parse error: {0}")]
    Parse(String),
    #[error("transport does not match interface {0}")]
    TransportMismatch(String),
    #[error("unknown simulation model: {0}")]
    UnknownSimulationModel(String),
    #[error("unknown descriptor: {0}")]
    UnknownDescriptor(String),
    #[error("duplicate device name: {0}")]
    DuplicateDevice(String),
    #[error("unknown device: {0}")]
    UnknownDevice(String),
    #[error("device {device} does not monitor {key}")]
    MissingDataPoint { device: String, key: DataPointKey },
}

/// Runtime failures of one read or write attempt. Callers turn these into
/// error codes; they never cross the device boundary.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("value is not numeric: {0}")]
    NotNumeric(String),
    #[error("timed out")]
    Timeout,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Communication(#[from] CommError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EncodeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{key} is not writable")]
    NotWritable { key: DataPointKey },
    #[error("value {value} out of range for {key}")]
    OutOfRange { key: DataPointKey, value: f64 },
}
