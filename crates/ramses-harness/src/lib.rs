//! Deterministic test harness for the RAMSES engine.
//!
//! The [`SimRadio`] stands in for a serial gateway: echoes, scripted
//! peers, echo loss, transcripts. Scenario tests under `tests/` drive
//! the full engine over it with tokio's paused clock, so every timeout
//! path runs in microseconds and is exactly reproducible.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod sim_radio;

pub use sim_radio::{Responder, SimRadio, SimRadioHandle};

/// Install a test subscriber honoring `RUST_LOG`, once per process.
///
/// Call at the top of a scenario test when its trace is worth reading;
/// repeated calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
