use cem_transport::{HttpMethod, RegisterKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A protocol descriptor as written in YAML, after placeholder substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub name: String,
    /// Kept as text so an unknown transport is reported as such rather than as a
    /// generic parse failure.
    pub interface: String,
    #[serde(default)]
    pub placeholders: Vec<String>,
    #[serde(default)]
    pub connection: ConnectionSpec,
    #[serde(default)]
    pub functional_profiles: Vec<ProfileSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionSpec {
    /// Informational only; the transport handle is connected by the caller.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub first_register_address: u16,
    #[serde(default)]
    pub slave_address: Option<u8>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub auth: AuthSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthSpec {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub name: String,
    #[serde(default)]
    pub data_points: Vec<PointSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub scaling: Option<f64>,

    // Modbus
    #[serde(default)]
    pub register: Option<u32>,
    #[serde(default)]
    pub size: Option<u16>,
    #[serde(default)]
    pub signed: bool,
    #[serde(default)]
    pub register_kind: Option<RegisterKind>,

    // REST
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub method: Option<HttpMethod>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub write: Option<RestWriteSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestWriteSpec {
    pub endpoint: String,
    #[serde(default = "default_write_method")]
    pub method: HttpMethod,
    /// Body template; `_value_` is replaced by the raw value.
    #[serde(default)]
    pub body: Option<String>,
}

fn default_write_method() -> HttpMethod {
    HttpMethod::Post
}
