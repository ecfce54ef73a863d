//! JSON wire form for MQTT gateways.
//!
//! MQTT transports carry one frame per message on `<base>/rx` and
//! `<base>/tx`, JSON-encoded with the same fields as the textual line.
//! Conversion is lossless; the checksum is not carried because the JSON
//! hop is not a radio.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ProtocolError, Result},
    frame::Frame,
};

/// One frame as published on an MQTT topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonFrame {
    /// ISO-8601 timestamp
    pub ts: DateTime<Utc>,
    /// Signal strength, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<u8>,
    /// Verb, unpadded
    pub verb: String,
    /// Source address
    pub src: String,
    /// Destination address
    pub dst: String,
    /// Announce slot
    pub announce: String,
    /// Four-hex command code
    pub code: String,
    /// Payload as uppercase hex
    pub payload: String,
}

impl From<&Frame> for JsonFrame {
    fn from(frame: &Frame) -> Self {
        Self {
            ts: frame.ts,
            rssi: frame.rssi,
            verb: frame.verb.as_str().to_string(),
            src: frame.src.to_string(),
            dst: frame.dst.to_string(),
            announce: frame.announce.to_string(),
            code: frame.code.to_string(),
            payload: hex::encode_upper(&frame.payload),
        }
    }
}

impl TryFrom<JsonFrame> for Frame {
    type Error = ProtocolError;

    fn try_from(json: JsonFrame) -> Result<Self> {
        let payload = hex::decode(&json.payload)
            .map_err(|_| ProtocolError::Malformed { reason: "payload is not hex" })?;
        Ok(Frame {
            ts: json.ts,
            rssi: json.rssi,
            verb: json.verb.parse()?,
            src: json.src.parse()?,
            dst: json.dst.parse()?,
            announce: json.announce.parse()?,
            code: json.code.parse()?,
            payload: payload.into(),
            checksum: None,
        })
    }
}

impl JsonFrame {
    /// Serialize for publication.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Json` when serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Json(e.to_string()))
    }

    /// Parse a received message.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Json` when the text is not a frame object.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Json(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::{address::Address, code::Code, verb::Verb};

    #[test]
    fn json_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let src: Address = "29:091138".parse().unwrap();
        let frame = Frame::new(ts, Verb::I, src, Address::NONE, Code::BIND, vec![0x00]);

        let json = JsonFrame::from(&frame);
        let text = json.to_json().unwrap();
        let back: Frame = JsonFrame::from_json(&text).unwrap().try_into().unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn bad_fields_are_rejected() {
        let ts = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let json = JsonFrame {
            ts,
            rssi: None,
            verb: "RX".to_string(),
            src: "29:091138".to_string(),
            dst: "--:------".to_string(),
            announce: "29:091138".to_string(),
            code: "1FC9".to_string(),
            payload: "00".to_string(),
        };
        assert!(Frame::try_from(json).is_err());

        assert!(JsonFrame::from_json("not json").is_err());
    }
}
