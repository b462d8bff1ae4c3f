use crate::{HttpRequest, HttpResponse, RegisterRequest, Result};
use async_trait::async_trait;

/// An already-connected Modbus client (TCP or RTU).
///
/// Handles are shared (`Arc<dyn ModbusTransport>`) between every device on the
/// same bus, so all methods take `&self`.
#[async_trait]
pub trait ModbusTransport: Send + Sync {
    /// Read one register window.
    async fn read_registers(&self, req: &RegisterRequest) -> Result<Vec<u16>>;

    /// Write consecutive holding registers starting at `address`.
    async fn write_registers(&self, unit_id: u8, address: u16, values: &[u16]) -> Result<()>;
}

/// An HTTP client able to execute one request.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, req: &HttpRequest) -> Result<HttpResponse>;
}
