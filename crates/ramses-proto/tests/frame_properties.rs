//! Property-based tests for the line codec.
//!
//! The round-trip, length, and checksum rules must hold for all
//! well-formed frames, not just the captured examples, so the frames here
//! are generated.

use bytes::Bytes;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use ramses_proto::{Address, Code, Frame, Packet, ProtocolError, Verb};

fn arbitrary_verb() -> impl Strategy<Value = Verb> {
    prop_oneof![Just(Verb::I), Just(Verb::Rq), Just(Verb::Rp), Just(Verb::W)]
}

fn arbitrary_device() -> impl Strategy<Value = Address> {
    (0u8..=63, 0u32..=262_142).prop_map(|(class, id)| {
        Address::new(class, id).expect("generated within range")
    })
}

/// Any destination: a device, the broadcast sentinel, or absent.
fn arbitrary_dst() -> impl Strategy<Value = Address> {
    prop_oneof![arbitrary_device(), Just(Address::ALL), Just(Address::NONE)]
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (
        arbitrary_verb(),
        arbitrary_device(),
        arbitrary_dst(),
        any::<u16>(),
        prop::collection::vec(any::<u8>(), 0..64),
        proptest::option::of(0u8..=200),
        0i64..=1_700_000_000,
    )
        .prop_map(|(verb, src, dst, code, payload, rssi, secs)| {
            let ts = Utc.timestamp_opt(secs, 123_456_000).single().expect("in range");
            let mut frame = Frame::new(ts, verb, src, dst, Code::new(code), Bytes::from(payload));
            frame.rssi = rssi;
            frame
        })
}

proptest! {
    /// decode(encode(f)) == f, checksum included.
    #[test]
    fn encode_decode_round_trip(frame in arbitrary_frame()) {
        let line = frame.encode();
        let decoded = Frame::decode(&line).expect("encoded frames decode");

        prop_assert_eq!(decoded.ts, frame.ts);
        prop_assert_eq!(decoded.rssi, frame.rssi);
        prop_assert!(decoded.same_transmission(&frame));
        prop_assert_eq!(decoded.announce, frame.announce);
        prop_assert_eq!(decoded.checksum, Some(frame.compute_checksum()));

        // stable under a second pass
        prop_assert_eq!(decoded.encode(), line);
    }

    /// The carried checksum brings the byte sum to zero mod 256.
    #[test]
    fn checksum_complements_to_zero(frame in arbitrary_frame()) {
        let line = frame.encode();
        let carried = u8::from_str_radix(&line[line.len() - 2..], 16).expect("hex suffix");
        prop_assert_eq!(carried, frame.compute_checksum());
    }

    /// A corrupted length field always fails with the length error.
    #[test]
    fn length_field_is_enforced(frame in arbitrary_frame(), bump in 1usize..=3) {
        let declared = frame.payload.len() + bump;
        if declared > 255 {
            return Ok(());
        }
        let line = frame.encode();
        let mut fields: Vec<String> =
            line.split_ascii_whitespace().map(str::to_string).collect();
        let dishonest = format!("{declared:03}");
        fields[8] = dishonest;
        let corrupted = fields.join(" ");

        match Frame::decode(&corrupted) {
            Err(ProtocolError::Length { declared: d, actual }) => {
                prop_assert_eq!(d, declared);
                prop_assert_eq!(actual, frame.payload.len());
            }
            other => prop_assert!(false, "expected length error, got {other:?}"),
        }
    }

    /// hdr is a pure function of (code, verb, first payload byte).
    #[test]
    fn hdr_is_deterministic(
        verb in arbitrary_verb(),
        code in any::<u16>(),
        first in any::<u8>(),
        tail_a in prop::collection::vec(any::<u8>(), 0..16),
        tail_b in prop::collection::vec(any::<u8>(), 0..16),
    ) {
        let ts = Utc.timestamp_opt(0, 0).single().expect("epoch");
        let src = Address::new(29, 91_138).expect("valid");
        let make = |tail: Vec<u8>| {
            let mut payload = vec![first];
            payload.extend(tail);
            Packet::from_frame(Frame::new(ts, verb, src, Address::NONE, Code::new(code), payload))
        };
        let a = make(tail_a);
        let b = make(tail_b);
        prop_assert_eq!(a.hdr(), b.hdr());
        prop_assert_eq!(a.ctx(), b.ctx());
    }
}
