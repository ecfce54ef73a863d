//! Validated packets with derived correlation keys.
//!
//! A [`Packet`] is a decoded [`Frame`] plus two synthetic keys:
//!
//! - `ctx` — a payload-derived discriminator (usually the first payload
//!   byte, the zone or domain index)
//! - `hdr` — the canonical `CODE|VERB|CTX` string used to correlate a
//!   reply with its request and to deduplicate

use std::fmt;

use crate::{address::Address, code::Code, frame::Frame, verb::Verb};

/// Payload-derived discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    /// A zone/domain index byte
    Index(u8),
    /// Codes whose context is fixed rather than positional (`10E0`)
    Flag(bool),
    /// Empty payload, nothing to discriminate on
    None,
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(idx) => write!(f, "{idx:02X}"),
            Self::Flag(true) => f.write_str("True"),
            Self::Flag(false) => f.write_str("False"),
            Self::None => Ok(()),
        }
    }
}

/// Context rule table.
///
/// Default: the first payload byte. `10E0` carries a whole identity record
/// with no index, so its context is fixed `True`; the zone-status codes
/// keep the positional rule explicitly for when the table grows
/// per-code variations.
#[must_use]
pub fn context_for(code: Code, payload: &[u8]) -> Context {
    match code {
        Code::DEVICE_INFO => Context::Flag(true),
        _ => match payload.first() {
            Some(first) => Context::Index(*first),
            None => Context::None,
        },
    }
}

/// Canonical header string for a (code, verb, context) triple.
#[must_use]
pub fn header_for(code: Code, verb: Verb, ctx: Context) -> String {
    format!("{code}|{}|{ctx}", verb.as_str())
}

/// A validated frame plus its derived keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    frame: Frame,
    ctx: Context,
    hdr: String,
}

impl Packet {
    /// Wrap a decoded frame, deriving `ctx` and `hdr`.
    #[must_use]
    pub fn from_frame(frame: Frame) -> Self {
        let ctx = context_for(frame.code, &frame.payload);
        let hdr = header_for(frame.code, frame.verb, ctx);
        Self { frame, ctx, hdr }
    }

    /// The underlying frame.
    #[must_use]
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Payload-derived context.
    #[must_use]
    pub fn ctx(&self) -> Context {
        self.ctx
    }

    /// Canonical `CODE|VERB|CTX` key.
    #[must_use]
    pub fn hdr(&self) -> &str {
        &self.hdr
    }

    /// The header a reply to this packet would carry, if one is expected.
    ///
    /// An `RQ` expects an `RP` with the same code and context; a `W`
    /// expects an `I` confirmation.
    #[must_use]
    pub fn expected_reply_hdr(&self) -> Option<String> {
        self.frame
            .verb
            .expected_reply()
            .map(|reply| header_for(self.frame.code, reply, self.ctx))
    }

    /// Frame verb.
    #[must_use]
    pub fn verb(&self) -> Verb {
        self.frame.verb
    }

    /// Frame code.
    #[must_use]
    pub fn code(&self) -> Code {
        self.frame.code
    }

    /// Frame source.
    #[must_use]
    pub fn src(&self) -> Address {
        self.frame.src
    }

    /// Frame destination.
    #[must_use]
    pub fn dst(&self) -> Address {
        self.frame.dst
    }

    /// Payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.frame.payload
    }
}
