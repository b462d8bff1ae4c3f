use crate::map::{ModbusAddress, RegisterMap, TransportAddress};
use crate::{DataPointKey, EncodeError};
use cem_transport::{HttpRequest, RegisterKind};

/// Token replaced by the raw value in REST write body templates.
pub const VALUE_TOKEN: &str = "_value_";

/// A write ready to hand to a transport client.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCommand {
    Registers { unit_id: u8, address: u16, values: Vec<u16> },
    Http(HttpRequest),
}

/// Reverse of `decode`: divide by scaling and shape the value for the wire.
pub fn encode_write(map: &RegisterMap, key: &DataPointKey, value: f64) -> Result<WriteCommand, EncodeError> {
    let entry = map.entry(key)?;
    let raw = value / entry.scaling;
    if !raw.is_finite() {
        return Err(EncodeError::OutOfRange { key: key.clone(), value });
    }
    match &entry.address {
        TransportAddress::Modbus(addr) => {
            if addr.kind == RegisterKind::Input {
                return Err(EncodeError::NotWritable { key: key.clone() });
            }
            let values = raw_to_registers(addr, raw.round())
                .ok_or_else(|| EncodeError::OutOfRange { key: key.clone(), value })?;
            Ok(WriteCommand::Registers {
                unit_id: addr.unit_id,
                address: addr.wire_address,
                values,
            })
        }
        TransportAddress::Rest(rest) => {
            let spec = rest
                .write
                .as_ref()
                .ok_or_else(|| EncodeError::NotWritable { key: key.clone() })?;
            let mut req = map.http_request(spec.method, &spec.endpoint);
            let body = spec
                .body
                .as_deref()
                .unwrap_or(VALUE_TOKEN)
                .replace(VALUE_TOKEN, &raw.to_string());
            req.headers
                .push(("Content-Type".to_string(), "application/json".to_string()));
            req.body = Some(body);
            Ok(WriteCommand::Http(req))
        }
    }
}

/// Split an integral value into big-endian words, `None` when it does not fit.
fn raw_to_registers(addr: &ModbusAddress, raw: f64) -> Option<Vec<u16>> {
    let bits = 16 * u32::from(addr.size);
    let (min, max) = if addr.signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    // f64 -> i128 saturates, so the range check below stays exact enough
    let int = raw as i128;
    if int < min || int > max {
        return None;
    }
    let bits_pattern = (int as u128) & ((1u128 << bits) - 1);
    Some(
        (0..addr.size)
            .rev()
            .map(|i| ((bits_pattern >> (16 * u32::from(i))) & 0xFFFF) as u16)
            .collect(),
    )
}
