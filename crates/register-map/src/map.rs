use crate::selector::Selector;
use crate::types::RestWriteSpec;
use crate::{ConfigError, DataPointKey};
use cem_transport::{HttpMethod, HttpRequest, Interface, RegisterKind, RegisterRequest};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ModbusAddress {
    /// Register number as written in the descriptor.
    pub register: u32,
    /// Address on the wire after the interface offset is applied.
    pub wire_address: u16,
    pub size: u16,
    pub signed: bool,
    pub kind: RegisterKind,
    pub unit_id: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestAddress {
    pub endpoint: String,
    pub method: HttpMethod,
    pub selector: Selector,
    pub params: Vec<(String, String)>,
    pub body: Option<String>,
    pub write: Option<RestWriteSpec>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportAddress {
    Modbus(ModbusAddress),
    Rest(RestAddress),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegisterEntry {
    pub key: DataPointKey,
    pub address: TransportAddress,
    pub scaling: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestAuth {
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

/// A transport request ready to hand to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportRequest {
    Modbus(RegisterRequest),
    Http(HttpRequest),
}

/// Compiled, immutable lookup table from data point to decode recipe.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    pub(crate) name: String,
    pub(crate) interface: Interface,
    pub(crate) base_url: String,
    pub(crate) auth: RestAuth,
    pub(crate) entries: HashMap<DataPointKey, RegisterEntry>,
    pub(crate) order: Vec<DataPointKey>,
}

impl RegisterMap {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interface(&self) -> Interface {
        self.interface
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in descriptor order.
    pub fn keys(&self) -> impl Iterator<Item = &DataPointKey> {
        self.order.iter()
    }

    pub fn contains(&self, key: &DataPointKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entry(&self, key: &DataPointKey) -> Result<&RegisterEntry, ConfigError> {
        self.entries
            .get(key)
            .ok_or_else(|| ConfigError::UnknownDataPoint(key.clone()))
    }

    /// Build the read request for `key`.
    pub fn read_request(&self, key: &DataPointKey) -> Result<TransportRequest, ConfigError> {
        let entry = self.entry(key)?;
        Ok(match &entry.address {
            TransportAddress::Modbus(m) => TransportRequest::Modbus(RegisterRequest {
                address: m.wire_address,
                count: m.size,
                unit_id: m.unit_id,
                kind: m.kind,
            }),
            TransportAddress::Rest(r) => {
                let mut req = self.http_request(r.method, &r.endpoint);
                req.query = r.params.clone();
                req.body = r.body.clone();
                TransportRequest::Http(req)
            }
        })
    }

    pub(crate) fn http_request(&self, method: HttpMethod, endpoint: &str) -> HttpRequest {
        let mut req = HttpRequest::get(format!("{}{}", self.base_url, endpoint));
        req.method = method;
        req.headers
            .push(("Accept".to_string(), "application/json".to_string()));
        match &self.auth {
            RestAuth::None => {}
            RestAuth::Bearer(token) => req
                .headers
                .push(("Authorization".to_string(), format!("Bearer {token}"))),
            RestAuth::Basic { username, password } => {
                req.basic_auth = Some((username.clone(), password.clone()));
            }
        }
        req
    }
}
