//! cem-transport: transport client contracts for energy devices
//!
//! This crate defines what the device backends expect from an already-connected
//! transport handle: raw Modbus register windows and plain HTTP request/response
//! exchanges. Connection lifecycle (connect, reconnect, token refresh) belongs to
//! the caller. The default build enables a `mock` backend so that the control
//! core and its tests run on any host without field hardware.

mod types;
pub use types::{
    HttpMethod, HttpRequest, HttpResponse, Interface, RegisterKind, RegisterRequest,
};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::{HttpTransport, ModbusTransport};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHttp, MockModbus};
