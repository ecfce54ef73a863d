//! Fuzz target for payload parsers
//!
//! Runs arbitrary bytes through the per-code descriptors and the `10E0`
//! identity parser. Short, ragged, and non-ASCII payloads must all come
//! back as errors, never panics.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ramses_proto::{payload::PayloadKind, Code, Fingerprint, Verb};

fuzz_target!(|input: (u16, u8, &[u8])| {
    let (code, verb_byte, payload) = input;
    let verb = match verb_byte % 4 {
        0 => Verb::I,
        1 => Verb::Rq,
        2 => Verb::Rp,
        _ => Verb::W,
    };

    let _ = PayloadKind::parse_lossy(Code::new(code), verb, payload);
    let _ = Fingerprint::parse(payload);
});
