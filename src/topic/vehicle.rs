use std::fmt;
use std::str::FromStr;

use crate::topic::KEY_DELIMITER;
use crate::utils::{FleetError, Result};

/// Plate-number style identifier of a tracked vehicle, e.g. `B1234ABC`.
///
/// Used verbatim as the last routing-key segment, so it may not contain the
/// key delimiter or the exchange wildcards `*` and `#`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VehicleId(String);

impl VehicleId {
    pub fn parse(value: &str) -> Result<Self> {
        let reason = if value.is_empty() {
            Some("must not be empty")
        } else if value.contains(KEY_DELIMITER) {
            Some("must not contain '.'")
        } else if value.contains(['*', '#']) {
            Some("must not contain routing wildcards")
        } else if value.chars().any(char::is_whitespace) {
            Some("must not contain whitespace")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(FleetError::InvalidIdentifier {
                value: value.to_string(),
                reason,
            }),
            None => Ok(Self(value.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VehicleId {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for VehicleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
