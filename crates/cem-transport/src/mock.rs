use crate::{
    HttpRequest, HttpResponse, HttpTransport, ModbusTransport, RegisterRequest, Result,
    TransportError,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-process register bank. Each instance is independent; registers are keyed
/// by (unit id, wire address) and read back as zero when never written.
#[derive(Debug, Default)]
pub struct MockModbus {
    registers: Mutex<HashMap<(u8, u16), u16>>,
    writes: Mutex<Vec<(u8, u16, Vec<u16>)>>,
    offline: AtomicBool,
}

impl MockModbus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&self, unit_id: u8, address: u16, value: u16) {
        if let Ok(mut regs) = self.registers.lock() {
            regs.insert((unit_id, address), value);
        }
    }

    /// Simulate a dead link: every request fails with an I/O error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// All writes seen so far, oldest first.
    pub fn writes(&self) -> Vec<(u8, u16, Vec<u16>)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Io("mock link offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ModbusTransport for MockModbus {
    async fn read_registers(&self, req: &RegisterRequest) -> Result<Vec<u16>> {
        self.check_online()?;
        let regs = self
            .registers
            .lock()
            .map_err(|_| TransportError::Io("register bank poisoned".to_string()))?;
        let out = (0..req.count)
            .map(|i| {
                let addr = req.address.wrapping_add(i);
                regs.get(&(req.unit_id, addr)).copied().unwrap_or(0)
            })
            .collect();
        Ok(out)
    }

    async fn write_registers(&self, unit_id: u8, address: u16, values: &[u16]) -> Result<()> {
        self.check_online()?;
        {
            let mut regs = self
                .registers
                .lock()
                .map_err(|_| TransportError::Io("register bank poisoned".to_string()))?;
            for (i, v) in values.iter().enumerate() {
                regs.insert((unit_id, address.wrapping_add(i as u16)), *v);
            }
        }
        if let Ok(mut w) = self.writes.lock() {
            w.push((unit_id, address, values.to_vec()));
        }
        Ok(())
    }
}

/// Canned HTTP responses keyed by full URL (query string excluded).
#[derive(Debug, Default)]
pub struct MockHttp {
    routes: Mutex<HashMap<String, HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: impl Into<String>, response: HttpResponse) {
        if let Ok(mut routes) = self.routes.lock() {
            routes.insert(url.into(), response);
        }
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HttpTransport for MockHttp {
    async fn execute(&self, req: &HttpRequest) -> Result<HttpResponse> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(req.clone());
        }
        let routes = self
            .routes
            .lock()
            .map_err(|_| TransportError::Io("route table poisoned".to_string()))?;
        match routes.get(&req.url) {
            Some(resp) if resp.is_success() => Ok(resp.clone()),
            Some(resp) => Err(TransportError::Status(resp.status)),
            None => Err(TransportError::NotConnected(req.url.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterKind;

    #[tokio::test]
    async fn unwritten_registers_read_as_zero() {
        let bus = MockModbus::new();
        bus.set_register(1, 10, 235);
        let req = RegisterRequest {
            address: 10,
            count: 2,
            unit_id: 1,
            kind: RegisterKind::Input,
        };
        assert_eq!(bus.read_registers(&req).await.unwrap(), vec![235, 0]);
    }

    #[tokio::test]
    async fn writes_land_in_the_bank_and_the_log() {
        let bus = MockModbus::new();
        bus.write_registers(3, 100, &[1, 2]).await.unwrap();
        let req = RegisterRequest {
            address: 100,
            count: 2,
            unit_id: 3,
            kind: RegisterKind::Holding,
        };
        assert_eq!(bus.read_registers(&req).await.unwrap(), vec![1, 2]);
        assert_eq!(bus.writes(), vec![(3, 100, vec![1, 2])]);
    }

    #[tokio::test]
    async fn offline_bus_fails_every_request() {
        let bus = MockModbus::new();
        bus.set_offline(true);
        let req = RegisterRequest {
            address: 0,
            count: 1,
            unit_id: 1,
            kind: RegisterKind::Input,
        };
        assert!(matches!(
            bus.read_registers(&req).await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn http_routes_and_status_errors() {
        let http = MockHttp::new();
        http.route("http://pv/api", HttpResponse::ok("{\"p\": 1}"));
        http.route(
            "http://pv/down",
            HttpResponse {
                status: 503,
                body: String::new(),
            },
        );
        let ok = http.execute(&HttpRequest::get("http://pv/api")).await.unwrap();
        assert_eq!(ok.body, "{\"p\": 1}");
        assert_eq!(
            http.execute(&HttpRequest::get("http://pv/down")).await,
            Err(TransportError::Status(503))
        );
        assert!(http.execute(&HttpRequest::get("http://nope")).await.is_err());
        assert_eq!(http.requests().len(), 3);
    }
}
