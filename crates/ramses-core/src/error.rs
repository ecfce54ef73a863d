//! Engine and binding error types.
//!
//! Every waiting step surfaces its failure as a tagged value; FSM
//! transitions pattern-match on kind rather than unwinding. `Cancelled`
//! is a normal completion from the engine's point of view and is never
//! logged as an error.

use thiserror::Error;

use crate::binding::BindState;

/// Errors completing a transaction or rejecting a submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Send attempts exceeded the retry limit
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        /// Total transmissions performed
        attempts: u8,
    },

    /// The send queue is full
    #[error("send queue full ({depth} pending)")]
    Busy {
        /// Queue depth at rejection time
        depth: usize,
    },

    /// The caller cancelled the transaction
    #[error("cancelled")]
    Cancelled,

    /// Submissions are disabled (`RAMSES_DISABLE_SENDING=1`)
    #[error("engine is in listen-only mode")]
    ReadOnly,

    /// The transport failed; the engine has stopped
    #[error("transport fault: {0}")]
    Transport(String),

    /// A binding attempt failed
    #[error(transparent)]
    Binding(#[from] BindError),

    /// The engine task is gone
    #[error("engine stopped")]
    Stopped,
}

/// Handshake phase a binding error is tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindPhase {
    /// Broadcasting the offer, awaiting an accept
    Tender,
    /// Answering an offer, awaiting the confirmation
    Accept,
    /// Awaiting the identity addendum
    Ratify,
}

impl std::fmt::Display for BindPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tender => "tender",
            Self::Accept => "accept",
            Self::Ratify => "ratify",
        };
        f.write_str(name)
    }
}

/// Terminal binding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Operation not valid in the context's current state
    #[error("binding operation invalid in state {state:?}")]
    InvalidState {
        /// State the context was in
        state: BindState,
    },

    /// The caller's setup could not be turned into a valid offer or accept
    #[error("binding setup rejected: {0}")]
    Setup(String),

    /// A waiting step's packet never arrived (waiting steps do not retry)
    #[error("binding timed out awaiting {phase}")]
    Timeout {
        /// Phase that timed out
        phase: BindPhase,
    },

    /// A sending step gave up after its retry budget
    #[error("binding gave up after {attempts} {phase} attempts")]
    RetriesExhausted {
        /// Phase that was being retried
        phase: BindPhase,
        /// Attempts performed
        attempts: u8,
    },

    /// The underlying transaction could not be sent
    #[error("binding send failed: {reason}")]
    SendFailed {
        /// Engine error that stopped the send
        reason: String,
    },

    /// The caller cancelled the attempt
    #[error("binding cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_converts() {
        let err: EngineError = BindError::Timeout { phase: BindPhase::Ratify }.into();
        assert_eq!(err.to_string(), "binding timed out awaiting ratify");
    }
}
