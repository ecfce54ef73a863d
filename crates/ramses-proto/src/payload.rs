//! Per-code payload descriptors.
//!
//! A closed registry keyed by [`Code`] drives payload validation and
//! parsing. Each descriptor is a (validate, parse) pair of plain function
//! pointers; the registry covers the codes the engine itself exercises.
//! Everything else decodes to [`PayloadKind::Raw`] via the lossy entry
//! point — unknown codes are a policy non-event, not a failure.

use bytes::Bytes;

use crate::{
    address::Address,
    code::Code,
    error::{ProtocolError, Result},
    fingerprint::Fingerprint,
    verb::Verb,
};

/// One `idx ‖ code ‖ address` element of a `1FC9` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindTriplet {
    /// Domain id (vendor-specific; `00` Vasco/ClimaRad, `21` Nuaire)
    pub idx: u8,
    /// Code being offered or accepted
    pub code: Code,
    /// Address of the device publishing or consuming it
    pub addr: Address,
}

impl BindTriplet {
    /// Parse a `1FC9` payload into its triplets.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the payload is empty or not a multiple of six
    /// bytes. Single-byte AFFIRM payloads are not triplets; callers handle
    /// them before calling this.
    pub fn parse_all(payload: &[u8]) -> Result<Vec<BindTriplet>> {
        if payload.is_empty() || payload.len() % 6 != 0 {
            return Err(ProtocolError::InvalidPayload {
                code: Code::BIND,
                reason: "payload is not a sequence of 6-byte triplets",
            });
        }
        Ok(payload
            .chunks_exact(6)
            .map(|chunk| BindTriplet {
                idx: chunk[0],
                code: Code::from_bytes([chunk[1], chunk[2]]),
                addr: Address::from_triplet([chunk[3], chunk[4], chunk[5]]),
            })
            .collect())
    }

    /// Encode triplets back to payload bytes.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the list is empty or the triplets do not all
    /// carry the same address — every slot in an offer or accept names the
    /// sender itself.
    pub fn encode_all(triplets: &[BindTriplet]) -> Result<Bytes> {
        let Some(first) = triplets.first() else {
            return Err(ProtocolError::InvalidPayload {
                code: Code::BIND,
                reason: "no triplets to encode",
            });
        };
        if triplets.iter().any(|t| t.addr != first.addr) {
            return Err(ProtocolError::InvalidPayload {
                code: Code::BIND,
                reason: "triplets name more than one address",
            });
        }

        let mut bytes = Vec::with_capacity(triplets.len() * 6);
        for triplet in triplets {
            bytes.push(triplet.idx);
            bytes.extend_from_slice(&triplet.code.to_bytes());
            bytes.extend_from_slice(&triplet.addr.to_triplet());
        }
        Ok(Bytes::from(bytes))
    }
}

/// Fan operating mode carried by `22F1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanMode {
    /// Fan off
    Off,
    /// Low speed
    Low,
    /// Medium speed
    Medium,
    /// High speed
    High,
    /// Demand-controlled
    Auto,
    /// Timed boost
    Boost,
}

impl FanMode {
    /// Wire byte for this mode.
    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Off => 0x00,
            Self::Low => 0x01,
            Self::Medium => 0x02,
            Self::High => 0x03,
            Self::Auto => 0x04,
            Self::Boost => 0x05,
        }
    }

    /// Decode a wire byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Off),
            0x01 => Some(Self::Low),
            0x02 => Some(Self::Medium),
            0x03 => Some(Self::High),
            0x04 => Some(Self::Auto),
            0x05 => Some(Self::Boost),
            _ => None,
        }
    }
}

/// Battery status carried by `1060`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryState {
    /// Zone/domain index
    pub idx: u8,
    /// Charge percentage; `None` when the device reports `FF`
    pub level: Option<u8>,
    /// Low-battery flag
    pub low: bool,
}

/// Parsed payload, tagged by shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadKind {
    /// `1FC9` triplet list
    Bind(Vec<BindTriplet>),
    /// `1FC9` single-byte confirmation
    BindConfirm(u8),
    /// `10E0` identity record
    Identity(Fingerprint),
    /// `22F1` fan mode
    FanMode {
        /// Zone/domain index
        idx: u8,
        /// Requested or reported mode
        mode: FanMode,
        /// Number of steps on the device's scale
        scale: u8,
    },
    /// `1060` battery status
    Battery(BatteryState),
    /// Anything without a registered descriptor
    Raw(Bytes),
}

impl PayloadKind {
    /// Parse a payload via the registry.
    ///
    /// # Errors
    ///
    /// `UnknownCode` for unregistered codes; descriptor-specific
    /// `InvalidPayload` otherwise.
    pub fn parse(code: Code, verb: Verb, payload: &[u8]) -> Result<Self> {
        let spec = spec_for(code).ok_or(ProtocolError::UnknownCode(code))?;
        (spec.parse)(verb, payload)
    }

    /// Like [`PayloadKind::parse`], but unknown codes come back raw.
    ///
    /// Descriptor violations still error; only the missing-descriptor case
    /// is forgiven.
    pub fn parse_lossy(code: Code, verb: Verb, payload: &[u8]) -> Result<Self> {
        match Self::parse(code, verb, payload) {
            Err(ProtocolError::UnknownCode(_)) => Ok(Self::Raw(Bytes::copy_from_slice(payload))),
            other => other,
        }
    }
}

/// Descriptor for one code.
pub struct CodeSpec {
    /// The code this descriptor covers
    pub code: Code,
    /// Shape check for outbound command payloads
    pub validate: fn(Verb, &[u8]) -> Result<()>,
    /// Structured parse for inbound payloads
    pub parse: fn(Verb, &[u8]) -> Result<PayloadKind>,
}

/// Look up the descriptor for a code.
#[must_use]
pub fn spec_for(code: Code) -> Option<&'static CodeSpec> {
    SPECS.iter().find(|spec| spec.code == code)
}

static SPECS: &[CodeSpec] = &[
    CodeSpec { code: Code::BIND, validate: validate_bind, parse: parse_bind },
    CodeSpec { code: Code::DEVICE_INFO, validate: validate_device_info, parse: parse_device_info },
    CodeSpec { code: Code::FAN_MODE, validate: validate_fan_mode, parse: parse_fan_mode },
    CodeSpec { code: Code::FAN_BOOST, validate: validate_fan_boost, parse: parse_raw_indexed },
    CodeSpec { code: Code::BATTERY_STATE, validate: validate_battery, parse: parse_battery },
    CodeSpec { code: Code::VENT_STATE, validate: validate_indexed_query, parse: parse_raw_any },
    CodeSpec { code: Code::FAN_STATE, validate: validate_indexed_query, parse: parse_raw_any },
];

fn validate_bind(_verb: Verb, payload: &[u8]) -> Result<()> {
    if payload.len() == 1 || (!payload.is_empty() && payload.len() % 6 == 0) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPayload {
            code: Code::BIND,
            reason: "expected triplets or a single confirmation byte",
        })
    }
}

fn parse_bind(_verb: Verb, payload: &[u8]) -> Result<PayloadKind> {
    if payload.len() == 1 {
        return Ok(PayloadKind::BindConfirm(payload[0]));
    }
    BindTriplet::parse_all(payload).map(PayloadKind::Bind)
}

fn validate_device_info(verb: Verb, payload: &[u8]) -> Result<()> {
    let ok = match verb {
        Verb::Rq => payload.len() == 1,
        _ => payload.len() >= Fingerprint::MIN_LEN,
    };
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPayload {
            code: Code::DEVICE_INFO,
            reason: "expected a 1-byte query or a full identity record",
        })
    }
}

fn parse_device_info(verb: Verb, payload: &[u8]) -> Result<PayloadKind> {
    if verb == Verb::Rq {
        return Ok(PayloadKind::Raw(Bytes::copy_from_slice(payload)));
    }
    Fingerprint::parse(payload).map(PayloadKind::Identity)
}

fn validate_fan_mode(verb: Verb, payload: &[u8]) -> Result<()> {
    let ok = match verb {
        Verb::Rq => payload.len() == 1,
        _ => payload.len() == 3 && FanMode::from_byte(payload[1]).is_some(),
    };
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPayload {
            code: Code::FAN_MODE,
            reason: "expected idx, mode, scale",
        })
    }
}

fn parse_fan_mode(verb: Verb, payload: &[u8]) -> Result<PayloadKind> {
    validate_fan_mode(verb, payload)?;
    if verb == Verb::Rq {
        return Ok(PayloadKind::Raw(Bytes::copy_from_slice(payload)));
    }
    let mode = FanMode::from_byte(payload[1]).ok_or(ProtocolError::InvalidPayload {
        code: Code::FAN_MODE,
        reason: "unknown mode byte",
    })?;
    Ok(PayloadKind::FanMode { idx: payload[0], mode, scale: payload[2] })
}

fn validate_fan_boost(_verb: Verb, payload: &[u8]) -> Result<()> {
    if payload.len() == 3 {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPayload {
            code: Code::FAN_BOOST,
            reason: "expected idx and a minutes word",
        })
    }
}

fn validate_battery(_verb: Verb, payload: &[u8]) -> Result<()> {
    if payload.len() == 3 {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPayload {
            code: Code::BATTERY_STATE,
            reason: "expected idx, level, low flag",
        })
    }
}

fn parse_battery(verb: Verb, payload: &[u8]) -> Result<PayloadKind> {
    validate_battery(verb, payload)?;
    let level = match payload[1] {
        0xFF => None,
        raw => Some(raw / 2),
    };
    Ok(PayloadKind::Battery(BatteryState { idx: payload[0], level, low: payload[2] == 0x00 }))
}

fn validate_indexed_query(verb: Verb, payload: &[u8]) -> Result<()> {
    let ok = match verb {
        Verb::Rq => payload.len() == 1,
        _ => !payload.is_empty(),
    };
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidPayload {
            code: Code::VENT_STATE,
            reason: "expected at least the index byte",
        })
    }
}

fn parse_raw_indexed(_verb: Verb, payload: &[u8]) -> Result<PayloadKind> {
    Ok(PayloadKind::Raw(Bytes::copy_from_slice(payload)))
}

fn parse_raw_any(_verb: Verb, payload: &[u8]) -> Result<PayloadKind> {
    Ok(PayloadKind::Raw(Bytes::copy_from_slice(payload)))
}
