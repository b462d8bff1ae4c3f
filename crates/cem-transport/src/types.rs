use core::fmt;
use serde::{Deserialize, Serialize};

/// Transport family a device speaks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Interface {
    #[serde(rename = "MODBUS_TCP")]
    ModbusTcp,
    #[serde(rename = "MODBUS_RTU")]
    ModbusRtu,
    #[serde(rename = "REST_API")]
    RestApi,
}

impl Interface {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "MODBUS_TCP" => Some(Self::ModbusTcp),
            "MODBUS_RTU" => Some(Self::ModbusRtu),
            "REST_API" => Some(Self::RestApi),
            _ => None,
        }
    }

    pub fn is_modbus(&self) -> bool {
        matches!(self, Self::ModbusTcp | Self::ModbusRtu)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ModbusTcp => "MODBUS_TCP",
            Self::ModbusRtu => "MODBUS_RTU",
            Self::RestApi => "REST_API",
        };
        f.write_str(s)
    }
}

/// Modbus register table to address.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterKind {
    Input,
    Holding,
}

/// A read of `count` consecutive 16-bit registers starting at the wire address.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RegisterRequest {
    pub address: u16,
    pub count: u16,
    pub unit_id: u8,
    pub kind: RegisterKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
        };
        f.write_str(s)
    }
}

/// A fully resolved HTTP request. Authentication is carried as data; the
/// client applies it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<String>,
    pub basic_auth: Option<(String, String)>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            basic_auth: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_names_round_trip_through_display() {
        for i in [Interface::ModbusTcp, Interface::ModbusRtu, Interface::RestApi] {
            assert_eq!(Interface::parse(&i.to_string()), Some(i));
        }
        assert_eq!(Interface::parse("MQTT"), None);
    }

    #[test]
    fn success_range() {
        assert!(HttpResponse::ok("{}").is_success());
        let resp = HttpResponse {
            status: 404,
            body: String::new(),
        };
        assert!(!resp.is_success());
    }
}
