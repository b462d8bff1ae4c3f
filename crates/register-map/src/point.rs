use core::fmt;
use serde::{Deserialize, Serialize};

/// One readable/writable quantity on a device: functional profile plus data point.
///
/// Both parts are case-sensitive.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataPointKey {
    pub functional_profile: String,
    pub data_point: String,
}

impl DataPointKey {
    pub fn new(functional_profile: impl Into<String>, data_point: impl Into<String>) -> Self {
        Self {
            functional_profile: functional_profile.into(),
            data_point: data_point.into(),
        }
    }

    /// Parse `Profile/Point`.
    pub fn parse(s: &str) -> Option<Self> {
        let (fp, dp) = s.split_once('/')?;
        let (fp, dp) = (fp.trim(), dp.trim());
        if fp.is_empty() || dp.is_empty() {
            return None;
        }
        Some(Self::new(fp, dp))
    }
}

impl fmt::Display for DataPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.functional_profile, self.data_point)
    }
}

pub const ERROR_UNIT: &str = "ERROR";

/// A single value read from a device in one cycle. `error_code == 0` means ok.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
    pub unit: String,
    pub error_code: i32,
}

impl Reading {
    pub fn ok(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
            error_code: 0,
        }
    }

    /// The placeholder stored for a point whose read failed.
    pub fn error() -> Self {
        Self {
            value: 0.0,
            unit: ERROR_UNIT.to_string(),
            error_code: 1,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key() {
        let k = DataPointKey::parse("ActivePowerAC/ActivePowerACtot").unwrap();
        assert_eq!(k.functional_profile, "ActivePowerAC");
        assert_eq!(k.data_point, "ActivePowerACtot");
        assert_eq!(k.to_string(), "ActivePowerAC/ActivePowerACtot");
        assert!(DataPointKey::parse("nope").is_none());
        assert!(DataPointKey::parse("/x").is_none());
    }

    #[test]
    fn keys_are_case_sensitive() {
        assert_ne!(DataPointKey::new("Fp", "Dp"), DataPointKey::new("fp", "dp"));
    }

    #[test]
    fn error_reading_shape() {
        let r = Reading::error();
        assert_eq!(r.value, 0.0);
        assert_eq!(r.unit, "ERROR");
        assert_eq!(r.error_code, 1);
        assert!(!r.is_ok());
    }
}
