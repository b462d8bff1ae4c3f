use thiserror::Error;

/// Write completed.
pub const WRITE_OK: i32 = 0;
/// The transport or library failed; may succeed next cycle.
pub const WRITE_COMM_ERROR: i32 = 1;
/// The device cannot perform the operation or rejected the value.
pub const WRITE_UNSUPPORTED: i32 = 2;
/// The device has no backend.
pub const WRITE_NO_BACKEND: i32 = 3;

/// Failure reported by the standardized device-library client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LibraryError {
    #[error("unknown data point {0}")]
    UnknownDataPoint(String),
    #[error("device library: {0}")]
    Client(String),
    #[error("device library call timed out")]
    Timeout,
}
