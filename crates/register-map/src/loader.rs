use crate::map::{ModbusAddress, RegisterEntry, RegisterMap, RestAddress, RestAuth, TransportAddress};
use crate::selector::Selector;
use crate::types::{AuthSpec, ConnectionSpec, DeviceDescriptor, PointSpec};
use crate::{ConfigError, DataPointKey, VALUE_TOKEN};
use anyhow::Context;
use cem_transport::{HttpMethod, Interface, RegisterKind};
use serde_yaml::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Connection-instance parameters substituted into a descriptor.
pub type ConnectionParams = BTreeMap<String, String>;

/// Raw descriptor texts by name. Texts stay unparsed until compiled, because
/// parsing only makes sense once placeholders are substituted.
#[derive(Debug, Default, Clone)]
pub struct DescriptorLibrary {
    pub descriptors: HashMap<String, String>,
}

impl DescriptorLibrary {
    pub fn insert(&mut self, name: impl Into<String>, text: String) {
        self.descriptors.insert(name.into(), text);
    }

    pub fn compile(&self, name: &str, params: &ConnectionParams) -> Result<RegisterMap, ConfigError> {
        let text = self
            .descriptors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownDescriptor(name.to_string()))?;
        compile(text, params)
    }
}

/// The `_name_` token for a placeholder.
pub fn placeholder_token(name: &str) -> String {
    format!("_{name}_")
}

/// Replace every occurrence of every `_key_` token by its parameter value.
pub fn substitute_placeholders(text: &str, params: &ConnectionParams) -> String {
    let mut out = text.to_string();
    for (key, value) in params {
        out = out.replace(&placeholder_token(key), value);
    }
    out
}

/// Placeholder names a descriptor declares, read before substitution.
pub fn declared_placeholders(text: &str) -> Result<Vec<String>, ConfigError> {
    let val: Value = serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let Some(list) = val.get("placeholders") else {
        return Ok(Vec::new());
    };
    let seq = list
        .as_sequence()
        .ok_or_else(|| ConfigError::Parse("`placeholders` must be a list".to_string()))?;
    seq.iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| ConfigError::Parse("placeholder names must be strings".to_string()))
        })
        .collect()
}

/// Substitute placeholders, parse, and build the register map.
pub fn compile(text: &str, params: &ConnectionParams) -> Result<RegisterMap, ConfigError> {
    let declared = declared_placeholders(text)?;
    if let Some(missing) = declared.iter().find(|p| !params.contains_key(*p)) {
        return Err(ConfigError::UnresolvedPlaceholder(missing.clone()));
    }
    let resolved = substitute_placeholders(text, params);
    let val: Value = serde_yaml::from_str(&resolved).map_err(|e| ConfigError::Parse(e.to_string()))?;
    if let Some(left) = leftover_token(&val) {
        return Err(ConfigError::UnresolvedPlaceholder(left));
    }
    let desc: DeviceDescriptor =
        serde_yaml::from_value(val).map_err(|e| ConfigError::Parse(e.to_string()))?;
    compile_descriptor(&desc)
}

/// First `_name_` token left in any string value, declared or not. The
/// write-body `_value_` token is filled per write and is skipped.
fn leftover_token(val: &Value) -> Option<String> {
    match val {
        Value::String(s) => token_in(s),
        Value::Sequence(seq) => seq.iter().find_map(leftover_token),
        Value::Mapping(map) => map
            .iter()
            .filter(|(k, _)| k.as_str() != Some("placeholders"))
            .find_map(|(_, v)| leftover_token(v)),
        Value::Tagged(t) => leftover_token(&t.value),
        _ => None,
    }
}

fn token_in(s: &str) -> Option<String> {
    s.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .find(|word| {
            word.len() > 2
                && word.starts_with('_')
                && word.ends_with('_')
                && word.chars().any(|c| c.is_ascii_alphanumeric())
                && *word != VALUE_TOKEN
        })
        .map(|word| word.trim_matches('_').to_string())
}

pub fn compile_descriptor(desc: &DeviceDescriptor) -> Result<RegisterMap, ConfigError> {
    let interface = Interface::parse(&desc.interface)
        .ok_or_else(|| ConfigError::UnsupportedInterface(desc.interface.clone()))?;
    let conn = &desc.connection;

    let base_url = match (interface, &conn.base_url) {
        (Interface::RestApi, None) => {
            return Err(ConfigError::Parse(
                "REST_API descriptor needs connection.base_url".to_string(),
            ))
        }
        (_, url) => url.clone().unwrap_or_default(),
    };
    let auth = match &conn.auth {
        AuthSpec::None => RestAuth::None,
        AuthSpec::Bearer { token } => RestAuth::Bearer(token.clone()),
        AuthSpec::Basic { username, password } => RestAuth::Basic {
            username: username.clone(),
            password: password.clone(),
        },
    };

    let mut entries = HashMap::new();
    let mut order = Vec::new();
    for profile in &desc.functional_profiles {
        for point in &profile.data_points {
            let key = DataPointKey::new(&profile.name, &point.name);
            if entries.contains_key(&key) {
                return Err(ConfigError::DuplicateKey(key));
            }
            let scaling = point.scaling.unwrap_or(1.0);
            if scaling == 0.0 {
                return Err(ConfigError::ZeroScaling(key));
            }
            if !scaling.is_finite() {
                return Err(ConfigError::InvalidAddress {
                    key,
                    reason: "scaling must be finite".to_string(),
                });
            }
            let address = match interface {
                Interface::ModbusTcp | Interface::ModbusRtu => {
                    TransportAddress::Modbus(modbus_address(interface, conn, &key, point)?)
                }
                Interface::RestApi => TransportAddress::Rest(rest_address(&key, point)?),
            };
            order.push(key.clone());
            entries.insert(
                key.clone(),
                RegisterEntry {
                    key,
                    address,
                    scaling,
                    unit: point.unit.clone(),
                },
            );
        }
    }

    debug!(descriptor = %desc.name, %interface, points = entries.len(), "compiled register map");
    Ok(RegisterMap {
        name: desc.name.clone(),
        interface,
        base_url,
        auth,
        entries,
        order,
    })
}

fn modbus_address(
    interface: Interface,
    conn: &ConnectionSpec,
    key: &DataPointKey,
    point: &PointSpec,
) -> Result<ModbusAddress, ConfigError> {
    let register = point.register.ok_or_else(|| ConfigError::MissingField {
        key: key.clone(),
        field: "register",
    })?;
    let size = point.size.unwrap_or(1);
    if !(1..=4).contains(&size) {
        return Err(ConfigError::InvalidAddress {
            key: key.clone(),
            reason: format!("size {size} not in 1..=4"),
        });
    }
    let offset = u32::from(conn.first_register_address);
    let wire = match interface {
        Interface::ModbusTcp => register.checked_sub(offset),
        _ => register.checked_add(offset),
    };
    let wire = wire
        .and_then(|w| u16::try_from(w).ok())
        .filter(|w| u32::from(*w) + u32::from(size) - 1 <= u32::from(u16::MAX))
        .ok_or_else(|| ConfigError::InvalidAddress {
            key: key.clone(),
            reason: format!("register {register} with offset {offset} is outside the address space"),
        })?;
    let default_kind = match interface {
        Interface::ModbusTcp => RegisterKind::Input,
        _ => RegisterKind::Holding,
    };
    Ok(ModbusAddress {
        register,
        wire_address: wire,
        size,
        signed: point.signed,
        kind: point.register_kind.unwrap_or(default_kind),
        unit_id: conn.slave_address.unwrap_or(1),
    })
}

fn rest_address(key: &DataPointKey, point: &PointSpec) -> Result<RestAddress, ConfigError> {
    let endpoint = point.endpoint.clone().ok_or_else(|| ConfigError::MissingField {
        key: key.clone(),
        field: "endpoint",
    })?;
    let source = point.response.as_deref().ok_or_else(|| ConfigError::MissingField {
        key: key.clone(),
        field: "response",
    })?;
    let selector = Selector::parse(source).map_err(|reason| ConfigError::InvalidSelector {
        selector: source.to_string(),
        reason,
    })?;
    Ok(RestAddress {
        endpoint,
        method: point.method.unwrap_or(HttpMethod::Get),
        selector,
        params: point
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        body: point.body.clone(),
        write: point.write.clone(),
    })
}

pub fn load_descriptor_file(path: impl AsRef<Path>) -> anyhow::Result<String> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading descriptor: {}", path.display()))?;
    let _: Value =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    Ok(raw)
}

pub fn load_descriptors_dir(dir: impl AsRef<Path>) -> anyhow::Result<DescriptorLibrary> {
    let mut lib = DescriptorLibrary::default();
    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(dir.as_ref())? {
        let entry = entry?;
        let path = entry.path();
        if let Some(ext) = path.extension() {
            if ext == "yml" || ext == "yaml" {
                entries.push(path);
            }
        }
    }
    entries.sort();
    for p in entries {
        let raw = load_descriptor_file(&p)?;
        let name = descriptor_name(&raw)
            .or_else(|| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .with_context(|| format!("descriptor without name: {}", p.display()))?;
        lib.insert(name, raw);
    }
    Ok(lib)
}

fn descriptor_name(raw: &str) -> Option<String> {
    let val: Value = serde_yaml::from_str(raw).ok()?;
    val.get("name")?.as_str().map(str::to_string)
}
