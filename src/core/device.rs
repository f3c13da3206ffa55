//! Controller device areas
//!
//! Each controller memory family is identified on the wire by a single binary
//! code and externally by a one-letter area code.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::utils::error::{McSrvError, Result};

/// Controller memory area addressed by word operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceCode {
    /// Data register
    D,
    /// File register
    R,
    /// Internal relay
    M,
    /// Input
    X,
    /// Output
    Y,
}

impl DeviceCode {
    /// Binary device code used in the 3E frame
    pub fn wire_code(self) -> u8 {
        match self {
            DeviceCode::D => 0xA8,
            DeviceCode::R => 0xAF,
            DeviceCode::M => 0x90,
            DeviceCode::X => 0x9C,
            DeviceCode::Y => 0x9D,
        }
    }

    /// Whether the area holds arbitrary word content suitable for strings.
    ///
    /// Only data and file registers qualify; relay and I/O areas are
    /// bit-oriented and reject string operations up front.
    pub fn supports_strings(self) -> bool {
        matches!(self, DeviceCode::D | DeviceCode::R)
    }
}

impl fmt::Display for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            DeviceCode::D => "D",
            DeviceCode::R => "R",
            DeviceCode::M => "M",
            DeviceCode::X => "X",
            DeviceCode::Y => "Y",
        };
        write!(f, "{}", letter)
    }
}

impl FromStr for DeviceCode {
    type Err = McSrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "D" => Ok(DeviceCode::D),
            "R" => Ok(DeviceCode::R),
            "M" => Ok(DeviceCode::M),
            "X" => Ok(DeviceCode::X),
            "Y" => Ok(DeviceCode::Y),
            other => Err(McSrvError::InvalidParameter(format!(
                "Invalid address type: {}. Must be one of: D, R, M, X, Y",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes() {
        assert_eq!(DeviceCode::D.wire_code(), 0xA8);
        assert_eq!(DeviceCode::R.wire_code(), 0xAF);
        assert_eq!(DeviceCode::M.wire_code(), 0x90);
        assert_eq!(DeviceCode::X.wire_code(), 0x9C);
        assert_eq!(DeviceCode::Y.wire_code(), 0x9D);
    }

    #[test]
    fn test_letter_parsing() {
        assert_eq!("D".parse::<DeviceCode>().unwrap(), DeviceCode::D);
        assert_eq!("y".parse::<DeviceCode>().unwrap(), DeviceCode::Y);
        assert_eq!(" m ".parse::<DeviceCode>().unwrap(), DeviceCode::M);
        assert!(matches!(
            "Q".parse::<DeviceCode>(),
            Err(McSrvError::InvalidParameter(_))
        ));
        assert!("DD".parse::<DeviceCode>().is_err());
    }

    #[test]
    fn test_string_support() {
        assert!(DeviceCode::D.supports_strings());
        assert!(DeviceCode::R.supports_strings());
        assert!(!DeviceCode::M.supports_strings());
        assert!(!DeviceCode::X.supports_strings());
        assert!(!DeviceCode::Y.supports_strings());
    }

    #[test]
    fn test_display_round_trip() {
        for dev in [
            DeviceCode::D,
            DeviceCode::R,
            DeviceCode::M,
            DeviceCode::X,
            DeviceCode::Y,
        ] {
            assert_eq!(dev.to_string().parse::<DeviceCode>().unwrap(), dev);
        }
    }
}
