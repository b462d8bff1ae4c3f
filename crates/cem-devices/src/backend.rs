use crate::error::{LibraryError, WRITE_COMM_ERROR, WRITE_NO_BACKEND, WRITE_OK, WRITE_UNSUPPORTED};
use crate::sim::SimulatedBackend;
use crate::units::normalize;
use crate::RuntimeContext;
use async_trait::async_trait;
use cem_transport::{HttpTransport, Interface, ModbusTransport, TransportError};
use futures::FutureExt;
use register_map::{
    decode, encode_write, CommError, ConfigError, DataPointKey, DecodeError,
    RawResponse, Reading, RegisterMap, TransportRequest, WriteCommand,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A data point resolved by the standardized device library.
#[async_trait]
pub trait DataPointHandle: Send + Sync {
    /// Current value and its unit.
    async fn get_value(&self) -> Result<(f64, String), LibraryError>;
    async fn set_value(&self, value: f64) -> Result<(), LibraryError>;
}

/// Client for a device described by the standardized device-description
/// library. Protocol handling stays inside the client.
#[async_trait]
pub trait DeviceLibraryClient: Send + Sync {
    async fn data_point(&self, key: &DataPointKey) -> Result<Arc<dyn DataPointHandle>, LibraryError>;
}

pub struct StandardizedBackend {
    client: Arc<dyn DeviceLibraryClient>,
    io_timeout: Duration,
}

impl StandardizedBackend {
    pub fn new(client: Arc<dyn DeviceLibraryClient>, ctx: &RuntimeContext) -> Self {
        Self {
            client,
            io_timeout: ctx.io_timeout(),
        }
    }

    async fn read(&self, key: &DataPointKey) -> Result<Reading, LibraryError> {
        let handle = self.client.data_point(key).await?;
        let (value, unit) = handle.get_value().await?;
        Ok(Reading::ok(value, unit))
    }

    async fn write(&self, key: &DataPointKey, value: f64) -> Result<(), LibraryError> {
        let handle = self.client.data_point(key).await?;
        handle.set_value(value).await
    }
}

/// Transport handle matching a register map's interface.
#[derive(Clone)]
pub enum NativeTransport {
    Modbus(Arc<dyn ModbusTransport>),
    Http(Arc<dyn HttpTransport>),
}

pub struct NativeBackend {
    map: Arc<RegisterMap>,
    transport: NativeTransport,
    io_timeout: Duration,
}

impl NativeBackend {
    /// Fails when the transport does not speak the map's interface.
    pub fn new(
        map: Arc<RegisterMap>,
        transport: NativeTransport,
        ctx: &RuntimeContext,
    ) -> Result<Self, ConfigError> {
        let fits = matches!(
            (map.interface(), &transport),
            (Interface::ModbusTcp | Interface::ModbusRtu, NativeTransport::Modbus(_))
                | (Interface::RestApi, NativeTransport::Http(_))
        );
        if !fits {
            return Err(ConfigError::TransportMismatch(map.interface().to_string()));
        }
        Ok(Self {
            map,
            transport,
            io_timeout: ctx.io_timeout(),
        })
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    async fn read(&self, key: &DataPointKey) -> Result<Reading, DecodeError> {
        match (self.map.read_request(key)?, &self.transport) {
            (TransportRequest::Modbus(req), NativeTransport::Modbus(t)) => {
                let words = with_timeout(self.io_timeout, t.read_registers(&req)).await?;
                decode(&self.map, key, RawResponse::Registers(&words))
            }
            (TransportRequest::Http(req), NativeTransport::Http(t)) => {
                let resp = with_timeout(self.io_timeout, t.execute(&req)).await?;
                if !resp.is_success() {
                    return Err(CommError::Transport(TransportError::Status(resp.status)).into());
                }
                decode(&self.map, key, RawResponse::Body(&resp.body))
            }
            _ => Err(ConfigError::TransportMismatch(self.map.interface().to_string()).into()),
        }
    }

    async fn write(&self, key: &DataPointKey, value: f64) -> i32 {
        let cmd = match encode_write(&self.map, key, value) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(map = %self.map.name(), %key, value, error = %e, "write rejected");
                return WRITE_UNSUPPORTED;
            }
        };
        let res = match (cmd, &self.transport) {
            (WriteCommand::Registers { unit_id, address, values }, NativeTransport::Modbus(t)) => {
                with_timeout(self.io_timeout, t.write_registers(unit_id, address, &values)).await
            }
            (WriteCommand::Http(req), NativeTransport::Http(t)) => {
                match with_timeout(self.io_timeout, t.execute(&req)).await {
                    Ok(resp) if resp.is_success() => Ok(()),
                    Ok(resp) => Err(CommError::Transport(TransportError::Status(resp.status))),
                    Err(e) => Err(e),
                }
            }
            _ => return WRITE_UNSUPPORTED,
        };
        match res {
            Ok(()) => WRITE_OK,
            Err(e) => {
                warn!(map = %self.map.name(), %key, value, error = %e, "write failed");
                WRITE_COMM_ERROR
            }
        }
    }
}

async fn with_timeout<T>(
    limit: Duration,
    fut: impl Future<Output = cem_transport::Result<T>>,
) -> Result<T, CommError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res.map_err(CommError::from),
        Err(_) => Err(CommError::Timeout),
    }
}

/// The one communication backend a device owns.
pub enum Backend {
    Standardized(StandardizedBackend),
    Native(NativeBackend),
    Simulated(SimulatedBackend),
    None,
}

impl Backend {
    /// Read one point. Never fails: problems become an error reading.
    pub async fn read_value(&self, key: &DataPointKey) -> Reading {
        let reading = match self {
            Backend::Standardized(b) => {
                match tokio::time::timeout(b.io_timeout, b.read(key)).await {
                    Ok(Ok(r)) => r,
                    Ok(Err(e)) => {
                        warn!(%key, error = %e, "library read failed");
                        Reading::error()
                    }
                    Err(_) => {
                        warn!(%key, "library read timed out");
                        Reading::error()
                    }
                }
            }
            Backend::Native(b) => match b.read(key).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(map = %b.map.name(), %key, error = %e, "native read failed");
                    Reading::error()
                }
            },
            Backend::Simulated(b) => b.read(key),
            Backend::None => {
                debug!(%key, "no backend");
                Reading::error()
            }
        };
        normalize(reading)
    }

    /// Write one point and return its error code. A panicking client is
    /// reported as a communication error.
    pub async fn write_value(&self, key: &DataPointKey, value: f64) -> i32 {
        match AssertUnwindSafe(self.write_unguarded(key, value))
            .catch_unwind()
            .await
        {
            Ok(code) => code,
            Err(_) => {
                warn!(%key, value, "backend panicked during write");
                WRITE_COMM_ERROR
            }
        }
    }

    async fn write_unguarded(&self, key: &DataPointKey, value: f64) -> i32 {
        match self {
            Backend::Standardized(b) => {
                match tokio::time::timeout(b.io_timeout, b.write(key, value)).await {
                    Ok(Ok(())) => WRITE_OK,
                    Ok(Err(e @ LibraryError::UnknownDataPoint(_))) => {
                        warn!(%key, value, error = %e, "library rejected write");
                        WRITE_UNSUPPORTED
                    }
                    Ok(Err(e)) => {
                        warn!(%key, value, error = %e, "library write failed");
                        WRITE_COMM_ERROR
                    }
                    Err(_) => {
                        warn!(%key, value, error = %LibraryError::Timeout, "library write failed");
                        WRITE_COMM_ERROR
                    }
                }
            }
            Backend::Native(b) => b.write(key, value).await,
            Backend::Simulated(b) => b.write(key, value),
            Backend::None => WRITE_NO_BACKEND,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Backend::None)
    }

    pub fn register_map(&self) -> Option<&RegisterMap> {
        match self {
            Backend::Native(b) => Some(b.map()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cem_transport::{HttpResponse, MockHttp, MockModbus};
    use register_map::{compile, ConnectionParams};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SENSOR: &str = r#"
name: sensor
interface: MODBUS_TCP
functional_profiles:
  - name: ActivePowerAC
    data_points:
      - { name: ActivePowerACtot, register: 100, size: 2, signed: true, unit: W }
  - name: Temperature
    data_points:
      - { name: Flow, register: 10, scaling: 0.1, unit: DEGREES_CELSIUS }
      - { name: Setpoint, register: 11, scaling: 0.1, register_kind: holding, unit: DEGREES_CELSIUS }
"#;

    const REST: &str = r#"
name: rest
interface: REST_API
connection: { base_url: "http://dev" }
functional_profiles:
  - name: ActivePowerAC
    data_points:
      - { name: ActivePowerACtot, endpoint: /p, response: power, unit: W }
"#;

    fn map(text: &str) -> Arc<RegisterMap> {
        Arc::new(compile(text, &ConnectionParams::new()).unwrap())
    }

    fn key(fp: &str, dp: &str) -> DataPointKey {
        DataPointKey::new(fp, dp)
    }

    #[tokio::test]
    async fn native_modbus_read_scales_and_normalizes() {
        let bus = Arc::new(MockModbus::new());
        bus.set_register(1, 10, 235);
        bus.set_register(1, 100, 0xFFFF);
        bus.set_register(1, 101, 0xEC78); // -5000 W
        let ctx = RuntimeContext::default();
        let backend = Backend::Native(
            NativeBackend::new(map(SENSOR), NativeTransport::Modbus(bus.clone()), &ctx).unwrap(),
        );
        let r = backend.read_value(&key("Temperature", "Flow")).await;
        assert!((r.value - 23.5).abs() < 1e-9);
        let r = backend.read_value(&key("ActivePowerAC", "ActivePowerACtot")).await;
        assert_eq!(r, Reading::ok(-5.0, "kW"));

        bus.set_offline(true);
        let r = backend.read_value(&key("Temperature", "Flow")).await;
        assert_eq!(r, Reading::error());
    }

    #[tokio::test]
    async fn native_write_codes() {
        let bus = Arc::new(MockModbus::new());
        let ctx = RuntimeContext::default();
        let backend = Backend::Native(
            NativeBackend::new(map(SENSOR), NativeTransport::Modbus(bus.clone()), &ctx).unwrap(),
        );
        assert_eq!(backend.write_value(&key("Temperature", "Setpoint"), 21.5).await, WRITE_OK);
        assert_eq!(bus.writes(), vec![(1, 11, vec![215])]);
        assert_eq!(
            backend.write_value(&key("Temperature", "Flow"), 1.0).await,
            WRITE_UNSUPPORTED
        );
        bus.set_offline(true);
        assert_eq!(
            backend.write_value(&key("Temperature", "Setpoint"), 21.5).await,
            WRITE_COMM_ERROR
        );
    }

    #[tokio::test]
    async fn native_rest_read_and_status_errors() {
        let http = Arc::new(MockHttp::new());
        http.route("http://dev/p", HttpResponse::ok(r#"{"power": 2500}"#));
        let ctx = RuntimeContext::default();
        let backend = Backend::Native(
            NativeBackend::new(map(REST), NativeTransport::Http(http.clone()), &ctx).unwrap(),
        );
        let k = key("ActivePowerAC", "ActivePowerACtot");
        assert_eq!(backend.read_value(&k).await, Reading::ok(2.5, "kW"));
        http.route("http://dev/p", HttpResponse { status: 503, body: String::new() });
        assert_eq!(backend.read_value(&k).await, Reading::error());
    }

    #[test]
    fn transport_must_match_interface() {
        let ctx = RuntimeContext::default();
        let http = Arc::new(MockHttp::new());
        let err = NativeBackend::new(map(SENSOR), NativeTransport::Http(http), &ctx)
            .err()
            .unwrap();
        assert_eq!(err, ConfigError::TransportMismatch("MODBUS_TCP".to_string()));
    }

    /// Library client answering from a fixed table; unknown points fail.
    #[derive(Default)]
    struct ScriptedLibrary {
        values: HashMap<DataPointKey, (f64, String)>,
        written: Arc<Mutex<Vec<(DataPointKey, f64)>>>,
        hang: bool,
    }

    struct ScriptedHandle {
        key: DataPointKey,
        value: Option<(f64, String)>,
        written: Arc<Mutex<Vec<(DataPointKey, f64)>>>,
        hang: bool,
    }

    #[async_trait]
    impl DataPointHandle for ScriptedHandle {
        async fn get_value(&self) -> Result<(f64, String), LibraryError> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.value
                .clone()
                .ok_or_else(|| LibraryError::Client("no value".to_string()))
        }

        async fn set_value(&self, value: f64) -> Result<(), LibraryError> {
            self.written.lock().unwrap().push((self.key.clone(), value));
            Ok(())
        }
    }

    #[async_trait]
    impl DeviceLibraryClient for ScriptedLibrary {
        async fn data_point(&self, key: &DataPointKey) -> Result<Arc<dyn DataPointHandle>, LibraryError> {
            Ok(Arc::new(ScriptedHandle {
                key: key.clone(),
                value: self.values.get(key).cloned(),
                written: self.written.clone(),
                hang: self.hang,
            }))
        }
    }

    #[tokio::test]
    async fn standardized_errors_become_error_readings() {
        let mut lib = ScriptedLibrary::default();
        lib.values
            .insert(key("ActivePowerAC", "ActivePowerACtot"), (1200.0, "W".to_string()));
        let written = lib.written.clone();
        let backend = Backend::Standardized(StandardizedBackend::new(
            Arc::new(lib),
            &RuntimeContext::default(),
        ));
        assert_eq!(
            backend.read_value(&key("ActivePowerAC", "ActivePowerACtot")).await,
            Reading::ok(1.2, "kW")
        );
        assert_eq!(backend.read_value(&key("X", "Y")).await, Reading::error());
        assert_eq!(backend.write_value(&key("X", "Y"), 3.0).await, WRITE_OK);
        assert_eq!(written.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn standardized_read_times_out() {
        let lib = ScriptedLibrary {
            hang: true,
            ..Default::default()
        };
        let ctx = RuntimeContext::default().with_io_timeout(Duration::from_millis(50));
        let backend = Backend::Standardized(StandardizedBackend::new(Arc::new(lib), &ctx));
        assert_eq!(backend.read_value(&key("A", "B")).await, Reading::error());
    }

    struct PanicOnWrite;

    #[async_trait]
    impl DataPointHandle for PanicOnWrite {
        async fn get_value(&self) -> Result<(f64, String), LibraryError> {
            Ok((0.0, "kW".to_string()))
        }

        async fn set_value(&self, _value: f64) -> Result<(), LibraryError> {
            panic!("driver crashed");
        }
    }

    struct CrashingLibrary;

    #[async_trait]
    impl DeviceLibraryClient for CrashingLibrary {
        async fn data_point(&self, _key: &DataPointKey) -> Result<Arc<dyn DataPointHandle>, LibraryError> {
            Ok(Arc::new(PanicOnWrite))
        }
    }

    #[tokio::test]
    async fn panicking_write_is_a_comm_error() {
        let backend = Backend::Standardized(StandardizedBackend::new(
            Arc::new(CrashingLibrary),
            &RuntimeContext::default(),
        ));
        assert_eq!(backend.write_value(&key("A", "B"), 1.0).await, WRITE_COMM_ERROR);
        // the same backend keeps answering
        assert_eq!(backend.write_value(&key("A", "B"), 0.0).await, WRITE_COMM_ERROR);
        assert_eq!(backend.read_value(&key("A", "B")).await, Reading::ok(0.0, "kW"));
    }

    #[tokio::test]
    async fn missing_backend() {
        assert_eq!(Backend::None.read_value(&key("A", "B")).await, Reading::error());
        assert_eq!(Backend::None.write_value(&key("A", "B"), 1.0).await, WRITE_NO_BACKEND);
    }
}
