//! Fuzz target for the transaction engine
//!
//! Drives the exchange with arbitrary interleavings of submissions,
//! inbound packets, echoes of the last transmission, clock ticks, and
//! cancellations. Whatever the interleaving:
//! - the engine must never panic
//! - each transaction resolves its completion slot at most once
//! - the queue never grows past its configured limit

#![no_main]

use std::time::{Duration, Instant};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use ramses_core::{EngineConfig, Exchange, ExchangeAction, TxFrame};
use ramses_proto::{Address, Code, Command, Frame, Packet, Verb};

#[derive(Arbitrary, Debug)]
enum Op {
    Submit { verb: u8, dst: (u8, u32), code: u16, payload: Vec<u8>, retries: Option<u8> },
    Inject { verb: u8, src: (u8, u32), dst: (u8, u32), code: u16, payload: Vec<u8> },
    EchoLast,
    Tick { advance_ms: u16 },
    Cancel { id: u8 },
}

fn device(class: u8, id: u32) -> Address {
    Address::new(class % 64, id % 262_143).unwrap_or(Address::ALL)
}

fn verb_of(byte: u8) -> Verb {
    match byte % 4 {
        0 => Verb::I,
        1 => Verb::Rq,
        2 => Verb::Rp,
        _ => Verb::W,
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mut config = EngineConfig::new(device(18, 730));
    config.read_only = false;
    let queue_limit = config.queue_limit;

    let mut engine: Exchange<Instant> = Exchange::new(config);
    let mut now = Instant::now();
    let mut last_tx: Option<TxFrame> = None;
    let mut completed: Vec<u64> = Vec::new();

    for op in ops {
        let actions = match op {
            Op::Submit { verb, dst, code, payload, retries } => {
                // the registry rejects malformed payloads; that path is
                // covered separately by payload_decode
                let Ok(mut cmd) =
                    Command::new(verb_of(verb), device(dst.0, dst.1), Code::new(code), payload)
                else {
                    continue;
                };
                if let Some(retries) = retries {
                    cmd = cmd.with_retries(retries % 4);
                }
                match engine.submit(cmd, now) {
                    Ok((_, actions)) => actions,
                    Err(_) => continue,
                }
            }
            Op::Inject { verb, src, dst, code, payload } => {
                let frame = Frame::new(
                    chrono::Utc::now(),
                    verb_of(verb),
                    device(src.0, src.1),
                    device(dst.0, dst.1),
                    Code::new(code),
                    payload,
                );
                engine.handle_packet(&Packet::from_frame(frame), now)
            }
            Op::EchoLast => match &last_tx {
                Some(tx) => {
                    let pkt = Packet::from_frame(tx.to_frame(chrono::Utc::now()));
                    engine.handle_packet(&pkt, now)
                }
                None => Vec::new(),
            },
            Op::Tick { advance_ms } => {
                now += Duration::from_millis(u64::from(advance_ms));
                engine.tick(now)
            }
            Op::Cancel { id } => engine.cancel(u64::from(id), now),
        };

        for action in actions {
            match action {
                ExchangeAction::Transmit(tx) => last_tx = Some(tx),
                ExchangeAction::Complete { id, .. } => {
                    assert!(!completed.contains(&id), "transaction {id} completed twice");
                    completed.push(id);
                }
                ExchangeAction::Publish(_) => {}
            }
        }

        assert!(engine.queue_depth() <= queue_limit);
    }
});
