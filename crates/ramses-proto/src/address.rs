//! Device addresses.
//!
//! A RAMSES address is a 6-bit device class plus an 18-bit serial, written
//! `TT:NNNNNN` with both parts decimal. The same 24 bits travel inside
//! `1FC9` binding payloads as a big-endian triplet, so the type converts
//! both ways.

use std::{fmt, str::FromStr};

use crate::error::ProtocolError;

/// Largest id encodable in 18 bits, minus the broadcast sentinel.
const MAX_ID: u32 = 262_142;

/// Largest class encodable in 6 bits.
const MAX_CLASS: u8 = 63;

/// Class value reserved for the absent-slot sentinel.
///
/// Never appears on the wire; `--:------` is parsed straight to it.
const NONE_CLASS: u8 = 0xFF;

/// Coarse device kind derived from the class tag.
///
/// Dispatch and `hdr` formation consult this; it deliberately stays coarse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// `01` — evohome controller
    Controller,
    /// `02` — underfloor heating controller
    UfhController,
    /// `04` — radiator valve actuator
    Trv,
    /// `07` — hot water sensor
    DhwSensor,
    /// `10` — OpenTherm bridge
    OtBridge,
    /// `13` — relay (BDR91 and friends)
    BdrRelay,
    /// `18` — the gateway radio itself
    Gateway,
    /// `29` — ventilation remote
    Rem,
    /// `30` — generic HVAC unit
    Hvac,
    /// `32` — fan unit
    Fan,
    /// `34` — round thermostat
    RoundStat,
    /// `37` — display switch
    Dis,
    /// `63` — broadcast class
    Broadcast,
    /// Any class tag without a known role
    Other(u8),
}

impl DeviceKind {
    /// Kind for a raw class tag.
    #[must_use]
    pub fn from_class(class: u8) -> Self {
        match class {
            1 => Self::Controller,
            2 => Self::UfhController,
            4 => Self::Trv,
            7 => Self::DhwSensor,
            10 => Self::OtBridge,
            13 => Self::BdrRelay,
            18 => Self::Gateway,
            29 => Self::Rem,
            30 => Self::Hvac,
            32 => Self::Fan,
            34 => Self::RoundStat,
            37 => Self::Dis,
            63 => Self::Broadcast,
            other => Self::Other(other),
        }
    }
}

/// A device address, or one of the two sentinels.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    class: u8,
    id: u32,
}

impl Address {
    /// The absent-slot sentinel, written `--:------`.
    pub const NONE: Address = Address { class: NONE_CLASS, id: 0 };

    /// The broadcast/null source, written `63:262142`.
    pub const ALL: Address = Address { class: 63, id: MAX_ID };

    /// Build an address from class and id.
    ///
    /// # Errors
    ///
    /// `ProtocolError::InvalidAddress` when either part is out of range.
    pub fn new(class: u8, id: u32) -> Result<Self, ProtocolError> {
        if class > MAX_CLASS || id > MAX_ID {
            return Err(ProtocolError::InvalidAddress { text: format!("{class:02}:{id:06}") });
        }
        Ok(Self { class, id })
    }

    /// Class tag (the `TT` part).
    #[must_use]
    pub fn class(&self) -> u8 {
        self.class
    }

    /// Serial (the `NNNNNN` part).
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Whether this is the absent-slot sentinel.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.class == NONE_CLASS
    }

    /// Whether this is the broadcast/null source.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        *self == Self::ALL
    }

    /// Coarse device kind for the class tag.
    #[must_use]
    pub fn kind(&self) -> DeviceKind {
        DeviceKind::from_class(self.class)
    }

    /// The 3-byte big-endian form used inside `1FC9` payloads.
    ///
    /// The absent sentinel maps to `FF FF FF`, which is only meaningful to
    /// the checksum; it never appears inside a binding triplet.
    #[must_use]
    pub fn to_triplet(&self) -> [u8; 3] {
        if self.is_none() {
            return [0xFF, 0xFF, 0xFF];
        }
        let packed = (u32::from(self.class) << 18) | self.id;
        [(packed >> 16) as u8, (packed >> 8) as u8, packed as u8]
    }

    /// Decode the 3-byte form.
    #[must_use]
    pub fn from_triplet(bytes: [u8; 3]) -> Self {
        let packed =
            (u32::from(bytes[0]) << 16) | (u32::from(bytes[1]) << 8) | u32::from(bytes[2]);
        Self { class: (packed >> 18) as u8, id: packed & 0x3FFFF }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("--:------")
        } else {
            write!(f, "{:02}:{:06}", self.class, self.id)
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "--:------" {
            return Ok(Self::NONE);
        }

        let invalid = || ProtocolError::InvalidAddress { text: s.to_string() };

        let (class_part, id_part) = s.split_once(':').ok_or_else(invalid)?;
        if class_part.len() != 2 || id_part.len() != 6 {
            return Err(invalid());
        }
        if !class_part.bytes().all(|b| b.is_ascii_digit())
            || !id_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let class: u8 = class_part.parse().map_err(|_| invalid())?;
        let id: u32 = id_part.parse().map_err(|_| invalid())?;
        Self::new(class, id).map_err(|_| invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let addr: Address = "29:091138".parse().unwrap();
        assert_eq!(addr.class(), 29);
        assert_eq!(addr.id(), 91138);
        assert_eq!(addr.to_string(), "29:091138");
    }

    #[test]
    fn sentinels() {
        assert_eq!("--:------".parse::<Address>().unwrap(), Address::NONE);
        assert_eq!("63:262142".parse::<Address>().unwrap(), Address::ALL);
        assert!(Address::NONE.is_none());
        assert!(Address::ALL.is_broadcast());
        assert_eq!(Address::NONE.to_string(), "--:------");
        assert_eq!(Address::ALL.to_string(), "63:262142");
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "29:91138", "29:0911380", "2:091138", "64:000001", "29:262143", "29-091138"]
        {
            assert!(bad.parse::<Address>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn triplet_round_trip() {
        let addr: Address = "29:091138".parse().unwrap();
        assert_eq!(addr.to_triplet(), [0x75, 0x64, 0x02]);
        assert_eq!(Address::from_triplet([0x75, 0x64, 0x02]), addr);

        let fan: Address = "32:022222".parse().unwrap();
        assert_eq!(fan.to_triplet(), [0x80, 0x56, 0xCE]);
        assert_eq!(Address::from_triplet(fan.to_triplet()), fan);
    }

    #[test]
    fn class_kinds() {
        let gw: Address = "18:000730".parse().unwrap();
        assert_eq!(gw.kind(), DeviceKind::Gateway);
        let rem: Address = "29:091138".parse().unwrap();
        assert_eq!(rem.kind(), DeviceKind::Rem);
        let fan: Address = "32:022222".parse().unwrap();
        assert_eq!(fan.kind(), DeviceKind::Fan);
        let dis: Address = "37:000001".parse().unwrap();
        assert_eq!(dis.kind(), DeviceKind::Dis);
        let odd: Address = "55:000001".parse().unwrap();
        assert_eq!(odd.kind(), DeviceKind::Other(55));
    }
}
