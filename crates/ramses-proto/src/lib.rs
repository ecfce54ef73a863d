//! Frame codec and packet model for the RAMSES II 868 MHz protocol.
//!
//! RAMSES frames travel as text lines between the engine and a serial or
//! MQTT radio gateway. This crate owns everything below the state
//! machines:
//!
//! - [`Address`], [`Verb`], [`Code`]: the field types
//! - [`Frame`]: the line codec, checksum included
//! - [`Packet`]: a validated frame plus its `hdr`/`ctx` correlation keys
//! - [`Command`]: outbound construction through per-code builders
//! - [`Fingerprint`]: `10E0` identity records and device classification
//! - [`JsonFrame`]: the MQTT wire form
//!
//! The state machines in `ramses-core` speak only in terms of the types
//! defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod address;
mod code;
mod command;
mod error;
mod fingerprint;
mod frame;
mod packet;
pub mod payload;
mod verb;
mod wire;

pub use address::{Address, DeviceKind};
pub use code::Code;
pub use command::{Command, Priority};
pub use error::{ProtocolError, Result};
pub use fingerprint::{Fingerprint, DEFAULT_OEM_CODE};
pub use frame::Frame;
pub use packet::{context_for, header_for, Context, Packet};
pub use payload::{BatteryState, BindTriplet, FanMode, PayloadKind};
pub use verb::Verb;
pub use wire::JsonFrame;
