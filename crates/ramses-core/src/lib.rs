//! Engine core for the RAMSES II client runtime.
//!
//! Three pieces, layered:
//!
//! - [`Exchange`]: the half-duplex transaction engine. One transaction
//!   in flight at a time; echo matching, reply correlation, retries,
//!   backoff, cancellation.
//! - [`BindContext`]: the device-pairing handshake, supplicant or
//!   respondent side.
//! - [`Engine`]: the runtime that owns a [`Transport`] and drives both
//!   FSMs from a single select loop, fanning spontaneous traffic out
//!   through the [`Dispatcher`].
//!
//! # Architecture
//!
//! Both state machines are Sans-IO: methods take the current instant as
//! a parameter and return actions for the driver to execute. Deadlines
//! live in the state; the runtime sleeps until the earliest one and
//! ticks. The same machines run against real time in production and
//! paused virtual time in tests.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod binding;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod transport;

pub use binding::{
    BindAction, BindContext, BindOutcome, BindRole, BindState, RespondentSetup, SupplicantSetup,
};
pub use config::{BindTimers, EngineConfig, DISABLE_SENDING_ENV};
pub use dispatcher::{Diagnostic, DiagnosticCounters, Dispatcher, EngineEvent, PacketFilter};
pub use engine::{Engine, EngineHandle, PendingCommand};
pub use error::{BindError, BindPhase, EngineError};
pub use exchange::{Exchange, ExchangeAction, TransactionId, TransactionState, TxFrame};
pub use transport::{is_out_of_band, ReplayTransport, Transport, TransportError};
