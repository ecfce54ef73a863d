//! Device identity records (`10E0`).
//!
//! HVAC vendors publish a product fingerprint once per boot and on demand.
//! The record names the manufacturer, the product, an OEM byte the binding
//! handshake cares about, two dates, and an ASCII model string. A static
//! table maps known fingerprints to device kinds; devices that never sent
//! a `10E0` default to OEM `00`.

use bytes::Bytes;
use chrono::NaiveDate;

use crate::{
    address::DeviceKind,
    code::Code,
    error::{ProtocolError, Result},
};

/// OEM byte assumed for devices whose identity was never observed.
pub const DEFAULT_OEM_CODE: u8 = 0x00;

/// Width the model field is NUL-padded to on encode.
const MODEL_FIELD_LEN: usize = 20;

/// A parsed `10E0` identity record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Leading index byte, `00` in every observed capture
    pub idx: u8,
    /// Manufacturer id
    pub manufacturer: [u8; 3],
    /// Product id
    pub product: [u8; 3],
    /// OEM byte; governs binding payload shape
    pub oem_code: u8,
    /// Two bytes with no known meaning, preserved for re-encode
    pub unknown: [u8; 2],
    /// Manufacture date; `None` when the device reports all-FF
    pub manufactured: Option<NaiveDate>,
    /// Firmware date
    pub firmware: Option<NaiveDate>,
    /// ASCII model string, trailing NULs stripped
    pub model: String,
}

impl Fingerprint {
    /// Shortest payload that still carries the fixed header fields.
    pub const MIN_LEN: usize = 18;

    /// Parse a `10E0` announce/reply payload.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when the record is shorter than the fixed header
    /// or the model field is not ASCII.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < Self::MIN_LEN {
            return Err(ProtocolError::InvalidPayload {
                code: Code::DEVICE_INFO,
                reason: "identity record too short",
            });
        }

        let model_bytes: Vec<u8> =
            payload[18..].iter().copied().take_while(|b| *b != 0x00).collect();
        let model = String::from_utf8(model_bytes)
            .map_err(|_| ProtocolError::InvalidPayload {
                code: Code::DEVICE_INFO,
                reason: "model string is not ASCII",
            })?
            .trim()
            .to_string();

        Ok(Self {
            idx: payload[0],
            manufacturer: [payload[1], payload[2], payload[3]],
            product: [payload[4], payload[5], payload[6]],
            oem_code: payload[7],
            unknown: [payload[8], payload[9]],
            manufactured: decode_date(&payload[10..14]),
            firmware: decode_date(&payload[14..18]),
            model,
        })
    }

    /// Encode back to payload bytes, the inverse of [`Fingerprint::parse`].
    ///
    /// The model field is NUL-padded to the width observed in captures, so
    /// an emulated device's announce looks like the real article.
    #[must_use]
    pub fn to_payload(&self) -> Bytes {
        let mut bytes = Vec::with_capacity(Self::MIN_LEN + MODEL_FIELD_LEN);
        bytes.push(self.idx);
        bytes.extend_from_slice(&self.manufacturer);
        bytes.extend_from_slice(&self.product);
        bytes.push(self.oem_code);
        bytes.extend_from_slice(&self.unknown);
        bytes.extend_from_slice(&encode_date(self.manufactured));
        bytes.extend_from_slice(&encode_date(self.firmware));
        bytes.extend_from_slice(self.model.as_bytes());
        let pad = MODEL_FIELD_LEN.saturating_sub(self.model.len());
        bytes.extend(std::iter::repeat_n(0x00, pad));
        Bytes::from(bytes)
    }

    /// Device kind for this fingerprint, if the product is known.
    ///
    /// Exact (manufacturer, product, oem) matches win; otherwise the model
    /// prefix decides.
    #[must_use]
    pub fn device_kind(&self) -> Option<DeviceKind> {
        if let Some(kind) = CLASSIFICATION
            .iter()
            .find(|entry| {
                entry.manufacturer == self.manufacturer
                    && entry.product == self.product
                    && entry.oem_code == self.oem_code
            })
            .map(|entry| entry.kind)
        {
            return Some(kind);
        }

        MODEL_PREFIXES
            .iter()
            .find(|(prefix, _)| self.model.starts_with(prefix))
            .map(|(_, kind)| *kind)
    }
}

/// Date fields are day, month, big-endian year; all-FF (and the zero day
/// some products ship) means unknown.
fn decode_date(bytes: &[u8]) -> Option<NaiveDate> {
    let day = bytes[0];
    let month = bytes[1];
    let year = u16::from_be_bytes([bytes[2], bytes[3]]);
    if day == 0 || day == 0xFF {
        return None;
    }
    NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
}

fn encode_date(date: Option<NaiveDate>) -> [u8; 4] {
    use chrono::Datelike;
    match date {
        Some(d) => {
            let year = d.year() as u16;
            [d.day() as u8, d.month() as u8, (year >> 8) as u8, year as u8]
        },
        None => [0xFF; 4],
    }
}

struct Classification {
    manufacturer: [u8; 3],
    product: [u8; 3],
    oem_code: u8,
    kind: DeviceKind,
}

/// Known product fingerprints.
const CLASSIFICATION: &[Classification] = &[
    // Vasco
    Classification {
        manufacturer: [0x00, 0x01, 0xC8],
        product: [0x40, 0x0F, 0x01],
        oem_code: 0x66,
        kind: DeviceKind::Rem,
    },
    Classification {
        manufacturer: [0x00, 0x01, 0xC8],
        product: [0x40, 0x10, 0x01],
        oem_code: 0x66,
        kind: DeviceKind::Fan,
    },
    // Nuaire
    Classification {
        manufacturer: [0x00, 0x01, 0xC9],
        product: [0x03, 0x0A, 0x01],
        oem_code: 0x6C,
        kind: DeviceKind::Rem,
    },
    Classification {
        manufacturer: [0x00, 0x01, 0xC9],
        product: [0x03, 0x0B, 0x01],
        oem_code: 0x6C,
        kind: DeviceKind::Fan,
    },
    // ClimaRad
    Classification {
        manufacturer: [0x00, 0x01, 0xCA],
        product: [0x01, 0x02, 0x01],
        oem_code: 0x65,
        kind: DeviceKind::Rem,
    },
];

/// Fallback classification by model-string prefix.
const MODEL_PREFIXES: &[(&str, DeviceKind)] = &[
    ("VMN-", DeviceKind::Rem),
    ("VMD-", DeviceKind::Fan),
    ("CVE-", DeviceKind::Fan),
    ("HRA ", DeviceKind::Fan),
    ("BRDG-", DeviceKind::Gateway),
    ("SPIDER", DeviceKind::Dis),
];
