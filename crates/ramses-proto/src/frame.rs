//! Line-oriented frame codec.
//!
//! A frame travels as one text line:
//!
//! ```text
//! <ts> <rssi> <verb> --- <src> <dst> <announce> <code> <len> <payload_hex> [*<checksum>]
//! ```
//!
//! `<ts>` is ISO-8601 to microsecond resolution, `<rssi>` is a 3-digit
//! decimal or `...` when unknown, the fourth slot is the unused sequence
//! field (always `---`), and the trailing `*HH` checksum is optional on
//! input but always synthesized on output.
//!
//! # Invariants
//!
//! - `payload.len()` equals the declared length field; violations are
//!   rejected with [`ProtocolError::Length`] before any higher layer sees
//!   the frame.
//! - A carried checksum must verify: the sum of all checksummed bytes plus
//!   the checksum itself is ≡ 0 (mod 256).
//! - `decode(encode(f)) == f` for every well-formed frame, checksum
//!   included.

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{
    address::Address,
    code::Code,
    error::{ProtocolError, Result},
    verb::Verb,
};

/// Timestamp layout on the wire (microsecond precision, no zone suffix).
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// A decoded transport-level frame.
///
/// Frames are ephemeral: the engine wraps each one in a
/// [`Packet`](crate::packet::Packet) (which derives `hdr`/`ctx`) before
/// anything downstream touches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Capture or transmission timestamp
    pub ts: DateTime<Utc>,
    /// Signal strength, `None` when the radio reported dots
    pub rssi: Option<u8>,
    /// Frame verb
    pub verb: Verb,
    /// Source address; never the absent sentinel
    pub src: Address,
    /// Destination address
    pub dst: Address,
    /// Announce slot; equals `src` on broadcast frames
    pub announce: Address,
    /// Command code
    pub code: Code,
    /// Payload bytes
    pub payload: Bytes,
    /// Checksum as carried on the input line, if any
    pub checksum: Option<u8>,
}

impl Frame {
    /// Build a frame for transmission.
    ///
    /// The announce slot follows the broadcast rule: an absent `dst` makes
    /// this a broadcast, so `announce` is set to `src`; otherwise it stays
    /// absent.
    #[must_use]
    pub fn new(
        ts: DateTime<Utc>,
        verb: Verb,
        src: Address,
        dst: Address,
        code: Code,
        payload: impl Into<Bytes>,
    ) -> Self {
        let announce = if dst.is_none() { src } else { Address::NONE };
        Self { ts, rssi: None, verb, src, dst, announce, code, payload: payload.into(), checksum: None }
    }

    /// Whether this frame is a broadcast.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.dst.is_none() && self.announce == self.src
    }

    /// Decode one text line.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Malformed`] on any structural violation
    /// - [`ProtocolError::Length`] when the length field disagrees with the
    ///   payload hex
    /// - [`ProtocolError::Checksum`] when a carried checksum fails to verify
    pub fn decode(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        if fields.len() != 10 && fields.len() != 11 {
            return Err(ProtocolError::Malformed { reason: "expected 10 or 11 fields" });
        }

        let ts = NaiveDateTime::parse_from_str(fields[0], "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|_| ProtocolError::Malformed { reason: "bad timestamp" })?
            .and_utc();

        let rssi = match fields[1] {
            "..." => None,
            digits if digits.len() == 3 && digits.bytes().all(|b| b.is_ascii_digit()) => Some(
                digits
                    .parse::<u8>()
                    .map_err(|_| ProtocolError::Malformed { reason: "rssi out of range" })?,
            ),
            _ => return Err(ProtocolError::Malformed { reason: "bad rssi" }),
        };

        let verb: Verb = fields[2].parse()?;

        if fields[3] != "---" {
            return Err(ProtocolError::Malformed { reason: "missing sequence slot" });
        }

        let src: Address = fields[4].parse()?;
        let dst: Address = fields[5].parse()?;
        let announce: Address = fields[6].parse()?;
        if src.is_none() {
            return Err(ProtocolError::Malformed { reason: "absent source address" });
        }

        let code: Code = fields[7].parse()?;

        let len_field = fields[8];
        if len_field.len() != 3 || !len_field.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ProtocolError::Malformed { reason: "bad length field" });
        }
        let declared: usize =
            len_field.parse().map_err(|_| ProtocolError::Malformed { reason: "bad length field" })?;

        let payload_hex = fields[9];
        if payload_hex.len() % 2 != 0 {
            return Err(ProtocolError::Malformed { reason: "odd-length payload hex" });
        }
        let payload = hex::decode(payload_hex)
            .map_err(|_| ProtocolError::Malformed { reason: "payload is not hex" })?;
        if payload.len() != declared {
            return Err(ProtocolError::Length { declared, actual: payload.len() });
        }

        let mut frame = Self {
            ts,
            rssi,
            verb,
            src,
            dst,
            announce,
            code,
            payload: Bytes::from(payload),
            checksum: None,
        };

        if let Some(field) = fields.get(10) {
            let hex_part = field
                .strip_prefix('*')
                .ok_or(ProtocolError::Malformed { reason: "bad checksum field" })?;
            if hex_part.len() != 2 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ProtocolError::Malformed { reason: "bad checksum field" });
            }
            let carried = u8::from_str_radix(hex_part, 16)
                .map_err(|_| ProtocolError::Malformed { reason: "bad checksum field" })?;
            let computed = frame.compute_checksum();
            if carried != computed {
                return Err(ProtocolError::Checksum { carried, computed });
            }
            frame.checksum = Some(carried);
        }

        Ok(frame)
    }

    /// Serialize to the line form, always with a synthesized checksum.
    #[must_use]
    pub fn encode(&self) -> String {
        let rssi = match self.rssi {
            Some(value) => format!("{value:03}"),
            None => "...".to_string(),
        };
        format!(
            "{} {} {} --- {} {} {} {} {:03} {} *{:02X}",
            self.ts.format(TS_FORMAT),
            rssi,
            self.verb.as_wire(),
            self.src,
            self.dst,
            self.announce,
            self.code,
            self.payload.len(),
            hex::encode_upper(&self.payload),
            self.compute_checksum(),
        )
    }

    /// Checksum over verb, addresses, code, length and payload.
    ///
    /// The byte stream is the padded verb's two ASCII bytes, the three
    /// address triplets, the code big-endian, the length byte, then the
    /// payload. The checksum is the value that brings the total to zero
    /// mod 256.
    #[must_use]
    pub fn compute_checksum(&self) -> u8 {
        let mut sum: u8 = 0;
        for byte in self.checksum_bytes() {
            sum = sum.wrapping_add(byte);
        }
        0u8.wrapping_sub(sum)
    }

    fn checksum_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.verb
            .as_wire()
            .bytes()
            .chain(self.src.to_triplet())
            .chain(self.dst.to_triplet())
            .chain(self.announce.to_triplet())
            .chain(self.code.to_bytes())
            .chain([self.payload.len() as u8])
            .chain(self.payload.iter().copied())
    }

    /// Byte-wise equality on the fields the radio actually transmits.
    ///
    /// Timestamps and RSSI are receiver-local, so echo matching ignores
    /// them.
    #[must_use]
    pub fn same_transmission(&self, other: &Frame) -> bool {
        self.verb == other.verb
            && self.src == other.src
            && self.dst == other.dst
            && self.code == other.code
            && self.payload == other.payload
    }
}
