use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("operation not supported on this transport: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("modbus exception code {0}")]
    Exception(u8),
    #[error("short response: expected {expected} registers, got {got}")]
    ShortResponse { expected: u16, got: usize },
    #[error("http status {0}")]
    Status(u16),
}
