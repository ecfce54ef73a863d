//! Frame verbs.

use std::{fmt, str::FromStr};

use crate::error::ProtocolError;

/// The four RAMSES verbs.
///
/// `I` announces, `RQ` asks, `RP` answers, `W` writes. A write is confirmed
/// by the target re-announcing the written value with `I`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Informational broadcast
    I,
    /// Request, expects `RP`
    Rq,
    /// Reply to an `RQ`
    Rp,
    /// Write, expects `I` confirmation
    W,
}

impl Verb {
    /// Two-character wire form, space-padded (`" I"`, `"RQ"`, `"RP"`, `" W"`).
    #[must_use]
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::I => " I",
            Self::Rq => "RQ",
            Self::Rp => "RP",
            Self::W => " W",
        }
    }

    /// Unpadded form used in `hdr` strings.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::I => "I",
            Self::Rq => "RQ",
            Self::Rp => "RP",
            Self::W => "W",
        }
    }

    /// The verb a peer answers with, if this verb expects an answer.
    #[must_use]
    pub fn expected_reply(&self) -> Option<Verb> {
        match self {
            Self::Rq => Some(Self::Rp),
            Self::W => Some(Self::I),
            Self::I | Self::Rp => None,
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = ProtocolError;

    /// Accepts both the padded wire form and the bare form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "I" | " I" => Ok(Self::I),
            "RQ" => Ok(Self::Rq),
            "RP" => Ok(Self::Rp),
            "W" | " W" => Ok(Self::W),
            other => Err(ProtocolError::InvalidVerb { text: other.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_forms_are_two_chars() {
        for verb in [Verb::I, Verb::Rq, Verb::Rp, Verb::W] {
            assert_eq!(verb.as_wire().len(), 2);
            assert_eq!(verb.as_wire().trim().parse::<Verb>().unwrap(), verb);
        }
    }

    #[test]
    fn reply_verbs() {
        assert_eq!(Verb::Rq.expected_reply(), Some(Verb::Rp));
        assert_eq!(Verb::W.expected_reply(), Some(Verb::I));
        assert_eq!(Verb::I.expected_reply(), None);
        assert_eq!(Verb::Rp.expected_reply(), None);
    }

    #[test]
    fn rejects_unknown() {
        assert!("RX".parse::<Verb>().is_err());
        assert!("".parse::<Verb>().is_err());
    }
}
