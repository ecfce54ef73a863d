//! Shared helpers for scenario tests.

#![allow(dead_code)]

use chrono::Utc;
use ramses_core::{Engine, EngineConfig, EngineError, EngineHandle};
use ramses_harness::{SimRadio, SimRadioHandle};
use ramses_proto::{Address, Code, Frame, Verb};
use std::time::Duration;

/// The Vasco remote's `10E0` identity payload, from a live capture.
pub const VASCO_REM_10E0: &str =
    "000001C8400F0166FFFFFFFFFFFF0E0207E3564D4E2D31374C4D503031000000000000000000";

pub fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

/// Engine defaults with listen-only mode pinned off, so a stray
/// `RAMSES_DISABLE_SENDING` in the test environment cannot skew results.
pub fn gateway_config() -> EngineConfig {
    let mut config = EngineConfig::new(addr("18:000730"));
    config.read_only = false;
    config
}

/// Spin up an engine over a fresh sim radio.
pub fn spawn_engine(
    config: EngineConfig,
) -> (SimRadioHandle, EngineHandle, tokio::task::JoinHandle<Result<(), EngineError>>) {
    let (radio, radio_handle) = SimRadio::new();
    let (engine, handle) = Engine::new(radio, config);
    let task = tokio::spawn(engine.run());
    (radio_handle, handle, task)
}

pub fn frame(verb: Verb, src: Address, dst: Address, code: Code, payload: Vec<u8>) -> Frame {
    Frame::new(Utc::now(), verb, src, dst, code, payload)
}

/// Wait (in virtual time) until the engine has transmitted `count`
/// frames.
pub async fn wait_for_sent(radio: &SimRadioHandle, count: usize) -> Vec<Frame> {
    for _ in 0..1000 {
        let sent = radio.sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("radio never reached {count} transmissions; saw {:?}", radio.sent());
}
