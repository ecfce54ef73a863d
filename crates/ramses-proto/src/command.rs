//! Outbound command construction.
//!
//! A [`Command`] is the pre-frame form of something to transmit: verb,
//! addresses, code, payload, plus the scheduling knobs the transaction
//! engine reads (priority, timeout, retry overrides). Builder constructors
//! cover the codes the engine itself sends; each one validates through the
//! payload registry so a malformed command never reaches the queue.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::{
    address::Address,
    code::Code,
    error::{ProtocolError, Result},
    fingerprint::Fingerprint,
    frame::Frame,
    packet::{self, Context},
    payload::{spec_for, BindTriplet, FanMode},
    verb::Verb,
};

/// Transmit priority classes, highest first.
///
/// The queue pops `Binding` before `Normal` before `Probe`; within a class
/// submission order is preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Binding handshake traffic
    Binding,
    /// Ordinary caller commands
    Normal,
    /// Background discovery probes
    Probe,
}

/// Number of steps advertised in `22F1` writes.
const FAN_MODE_SCALE: u8 = 0x07;

/// An outbound command awaiting transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Verb to transmit with
    pub verb: Verb,
    /// Source override; `None` lets the engine inject its gateway address
    pub src: Option<Address>,
    /// Destination device
    pub dst: Address,
    /// Command code
    pub code: Code,
    /// Payload bytes
    pub payload: Bytes,
    /// Queue class
    pub priority: Priority,
    /// Reply-wait override; `None` uses the engine default
    pub timeout: Option<Duration>,
    /// Retry override; `None` uses the engine default
    pub retries: Option<u8>,
    /// Whether the engine should wait for a reply after the echo
    pub expect_reply: bool,
}

impl Command {
    /// Build a command, validating the payload against the code registry.
    ///
    /// Codes without a registered descriptor are accepted as-is; the
    /// payload stays opaque.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when a registered descriptor rejects the shape.
    pub fn new(verb: Verb, dst: Address, code: Code, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        if let Some(spec) = spec_for(code) {
            (spec.validate)(verb, &payload)?;
        }
        let expect_reply = verb.expected_reply().is_some();
        Ok(Self {
            verb,
            src: None,
            dst,
            code,
            payload,
            priority: Priority::Normal,
            timeout: None,
            retries: None,
            expect_reply,
        })
    }

    /// Set an explicit source address (device emulation).
    #[must_use]
    pub fn with_src(mut self, src: Address) -> Self {
        self.src = Some(src);
        self
    }

    /// Set the queue class.
    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Override the reply-wait timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry count.
    #[must_use]
    pub fn with_retries(mut self, retries: u8) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Complete on echo without waiting for any reply.
    #[must_use]
    pub fn no_reply(mut self) -> Self {
        self.expect_reply = false;
        self
    }

    /// Payload-derived context.
    #[must_use]
    pub fn ctx(&self) -> Context {
        packet::context_for(self.code, &self.payload)
    }

    /// Canonical header for the frame this command will produce.
    #[must_use]
    pub fn hdr(&self) -> String {
        packet::header_for(self.code, self.verb, self.ctx())
    }

    /// Header of the reply this command waits for, if any.
    #[must_use]
    pub fn expected_reply_hdr(&self) -> Option<String> {
        if !self.expect_reply {
            return None;
        }
        self.verb
            .expected_reply()
            .map(|reply| packet::header_for(self.code, reply, self.ctx()))
    }

    /// Materialize the frame, with the source resolved by the engine.
    #[must_use]
    pub fn to_frame(&self, ts: DateTime<Utc>, resolved_src: Address) -> Frame {
        Frame::new(ts, self.verb, resolved_src, self.dst, self.code, self.payload.clone())
    }

    // --- builders for the codes the engine sends itself ---

    /// `RQ 10E0` — ask a device for its identity record.
    #[must_use]
    pub fn identity_request(dst: Address) -> Self {
        Self {
            verb: Verb::Rq,
            src: None,
            dst,
            code: Code::DEVICE_INFO,
            payload: Bytes::from_static(&[0x00]),
            priority: Priority::Normal,
            timeout: None,
            retries: None,
            expect_reply: true,
        }
    }

    /// `I 10E0` to `63:262142` — publish an identity record.
    #[must_use]
    pub fn identity_announce(src: Address, fingerprint: &Fingerprint) -> Self {
        Self {
            verb: Verb::I,
            src: Some(src),
            dst: Address::ALL,
            code: Code::DEVICE_INFO,
            payload: fingerprint.to_payload(),
            priority: Priority::Normal,
            timeout: None,
            retries: None,
            expect_reply: false,
        }
    }

    /// `W 22F1` — set a fan's operating mode.
    #[must_use]
    pub fn fan_mode(dst: Address, mode: FanMode) -> Self {
        Self {
            verb: Verb::W,
            src: None,
            dst,
            code: Code::FAN_MODE,
            payload: Bytes::from(vec![0x00, mode.to_byte(), FAN_MODE_SCALE]),
            priority: Priority::Normal,
            timeout: None,
            retries: None,
            expect_reply: true,
        }
    }

    /// `RQ 31DA` — query a unit's ventilation state.
    #[must_use]
    pub fn vent_status_request(dst: Address) -> Self {
        Self {
            verb: Verb::Rq,
            src: None,
            dst,
            code: Code::VENT_STATE,
            payload: Bytes::from_static(&[0x00]),
            priority: Priority::Probe,
            timeout: None,
            retries: None,
            expect_reply: true,
        }
    }

    /// TENDER — broadcast a binding offer.
    ///
    /// Triplet order matches captures: the caller's codes at the offer
    /// idx, the OEM identity slot when an OEM byte is supplied, then the
    /// mandatory `00 1FC9` self-triplet.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when `codes` is empty.
    pub fn bind_offer(src: Address, idx: u8, codes: &[Code], oem_code: Option<u8>) -> Result<Self> {
        if codes.is_empty() {
            return Err(ProtocolError::InvalidPayload {
                code: Code::BIND,
                reason: "offer carries no codes",
            });
        }
        let mut triplets: Vec<BindTriplet> =
            codes.iter().map(|&code| BindTriplet { idx, code, addr: src }).collect();
        if let Some(oem) = oem_code {
            triplets.push(BindTriplet { idx: oem, code: Code::DEVICE_INFO, addr: src });
        }
        triplets.push(BindTriplet { idx: 0x00, code: Code::BIND, addr: src });

        Ok(Self {
            verb: Verb::I,
            src: Some(src),
            dst: Address::NONE,
            code: Code::BIND,
            payload: BindTriplet::encode_all(&triplets)?,
            priority: Priority::Binding,
            timeout: None,
            retries: None,
            expect_reply: false,
        })
    }

    /// ACCEPT — answer a tender with the codes this device will publish.
    ///
    /// The binding engine waits for the AFFIRM itself, so the transaction
    /// completes on echo.
    ///
    /// # Errors
    ///
    /// `InvalidPayload` when `codes` is empty.
    pub fn bind_accept(src: Address, dst: Address, idx: u8, codes: &[Code]) -> Result<Self> {
        let triplets: Vec<BindTriplet> =
            codes.iter().map(|&code| BindTriplet { idx, code, addr: src }).collect();
        Ok(Self {
            verb: Verb::W,
            src: Some(src),
            dst,
            code: Code::BIND,
            payload: BindTriplet::encode_all(&triplets)?,
            priority: Priority::Binding,
            timeout: None,
            retries: None,
            expect_reply: false,
        })
    }

    /// AFFIRM — confirm a binding with the respondent's idx.
    #[must_use]
    pub fn bind_confirm(src: Address, dst: Address, idx: u8) -> Self {
        Self {
            verb: Verb::I,
            src: Some(src),
            dst,
            code: Code::BIND,
            payload: Bytes::from(vec![idx]),
            priority: Priority::Binding,
            timeout: None,
            retries: None,
            expect_reply: false,
        }
    }
}
