use crate::map::{ModbusAddress, RegisterMap, TransportAddress};
use crate::selector::as_number;
use crate::{CommError, DataPointKey, DecodeError, Reading};
use serde_json::Value;

/// What a transport client handed back for one read request.
#[derive(Debug, Clone, Copy)]
pub enum RawResponse<'a> {
    Registers(&'a [u16]),
    Body(&'a str),
}

/// Turn a raw transport response into a scaled reading tagged with the
/// entry's declared unit. Units are not normalized here.
pub fn decode(map: &RegisterMap, key: &DataPointKey, raw: RawResponse<'_>) -> Result<Reading, DecodeError> {
    let entry = map.entry(key)?;
    let value = match (&entry.address, raw) {
        (TransportAddress::Modbus(addr), RawResponse::Registers(words)) => {
            registers_to_raw(addr, words)? as f64
        }
        (TransportAddress::Rest(rest), RawResponse::Body(body)) => {
            let doc: Value =
                serde_json::from_str(body).map_err(|e| CommError::Malformed(e.to_string()))?;
            let selected = rest
                .selector
                .select(&doc)
                .ok_or_else(|| CommError::Malformed(format!("nothing at `{}`", rest.selector)))?;
            as_number(selected).ok_or_else(|| CommError::NotNumeric(selected.to_string()))?
        }
        (TransportAddress::Modbus(_), RawResponse::Body(_)) => {
            return Err(CommError::Malformed("expected registers, got a body".to_string()).into())
        }
        (TransportAddress::Rest(_), RawResponse::Registers(_)) => {
            return Err(CommError::Malformed("expected a body, got registers".to_string()).into())
        }
    };
    Ok(Reading::ok(value * entry.scaling, entry.unit.clone()))
}

/// Combine a big-endian register window into one integer.
pub fn registers_to_raw(addr: &ModbusAddress, words: &[u16]) -> Result<i64, CommError> {
    let size = usize::from(addr.size);
    if words.len() < size {
        return Err(CommError::Transport(cem_transport::TransportError::ShortResponse {
            expected: addr.size,
            got: words.len(),
        }));
    }
    let mut acc: u64 = 0;
    for w in &words[..size] {
        acc = (acc << 16) | u64::from(*w);
    }
    let bits = 16 * u32::from(addr.size);
    if !addr.signed {
        // a full 64-bit window above i64::MAX cannot be represented
        return i64::try_from(acc).map_err(|_| CommError::Malformed(format!("{acc} overflows")));
    }
    let shift = 64 - bits;
    Ok(((acc << shift) as i64) >> shift)
}
