//! Command codes.

use std::{fmt, str::FromStr};

use crate::error::ProtocolError;

/// A 4-hex-digit command code.
///
/// The constants below are the codes the engine itself touches; everything
/// else flows through as opaque `Code` values with raw payloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(u16);

impl Code {
    /// `0008` — relay demand
    pub const RELAY_DEMAND: Code = Code(0x0008);
    /// `1060` — battery state
    pub const BATTERY_STATE: Code = Code(0x1060);
    /// `10E0` — device identity
    pub const DEVICE_INFO: Code = Code(0x10E0);
    /// `1FC9` — binding handshake
    pub const BIND: Code = Code(0x1FC9);
    /// `22F1` — fan mode
    pub const FAN_MODE: Code = Code(0x22F1);
    /// `22F3` — fan boost timer
    pub const FAN_BOOST: Code = Code(0x22F3);
    /// `30C9` — temperature
    pub const TEMPERATURE: Code = Code(0x30C9);
    /// `31D9` — fan state
    pub const FAN_STATE: Code = Code(0x31D9);
    /// `31DA` — ventilation state
    pub const VENT_STATE: Code = Code(0x31DA);

    /// Build a code from its numeric value.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Numeric value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Big-endian byte form, as embedded in binding triplets.
    #[must_use]
    pub const fn to_bytes(&self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    /// Decode the byte form.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Code({:04X})", self.0)
    }
}

impl FromStr for Code {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidCode { text: s.to_string() });
        }
        u16::from_str_radix(s, 16)
            .map(Code)
            .map_err(|_| ProtocolError::InvalidCode { text: s.to_string() })
    }
}
