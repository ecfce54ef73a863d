//! Fuzz target for Frame::decode
//!
//! Feeds arbitrary text at the line codec to find:
//! - Parser crashes or panics
//! - Slicing past token boundaries
//! - Length/checksum checks that can be bypassed
//!
//! The decoder must NEVER panic. All invalid lines return an error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ramses_proto::Frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        // invalid lines must come back as errors, never panics
        if let Ok(frame) = Frame::decode(line) {
            // and every accepted frame must survive a round trip
            let reencoded = frame.encode();
            let reparsed = Frame::decode(&reencoded).expect("re-encoded frame decodes");
            assert!(frame.same_transmission(&reparsed));
        }
    }
});
