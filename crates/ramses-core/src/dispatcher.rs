//! Packet fan-out to subscribers.
//!
//! Subscribers register a predicate on (code, verb, src) and receive
//! matching spontaneous packets in registration order. A once-
//! subscription deregisters after its first match, which is how lazy
//! feature detection hooks in without touching the state machines.
//!
//! Codec rejects never crash anything: they are counted per kind and
//! surfaced on the same streams as diagnostic events.

use ramses_proto::{Address, Code, Packet, ProtocolError, Verb};
use tokio::sync::mpsc;

/// Predicate for routing packets to a subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFilter {
    /// Match only this code
    pub code: Option<Code>,
    /// Match only this verb
    pub verb: Option<Verb>,
    /// Match only this source device
    pub src: Option<Address>,
}

impl PacketFilter {
    /// Match everything.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    /// Match one code.
    #[must_use]
    pub fn for_code(code: Code) -> Self {
        Self { code: Some(code), ..Self::default() }
    }

    /// Restrict to a verb.
    #[must_use]
    pub fn with_verb(mut self, verb: Verb) -> Self {
        self.verb = Some(verb);
        self
    }

    /// Restrict to a source device.
    #[must_use]
    pub fn with_src(mut self, src: Address) -> Self {
        self.src = Some(src);
        self
    }

    /// Whether a packet passes this filter.
    #[must_use]
    pub fn matches(&self, pkt: &Packet) -> bool {
        self.code.is_none_or(|code| pkt.code() == code)
            && self.verb.is_none_or(|verb| pkt.verb() == verb)
            && self.src.is_none_or(|src| pkt.src() == src)
    }
}

/// What subscribers receive.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A spontaneous packet that passed the subscriber's filter
    Packet(Packet),
    /// A non-fatal problem worth recording
    Diagnostic(Diagnostic),
}

/// A recorded non-fatal problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Stable kind label (`malformed`, `length`, `checksum`, `binding`, …)
    pub kind: &'static str,
    /// Human-readable detail
    pub detail: String,
}

/// Running totals per codec reject kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticCounters {
    /// Structurally invalid lines
    pub malformed: u64,
    /// Length-field mismatches
    pub length: u64,
    /// Checksum failures
    pub checksum: u64,
    /// Everything else
    pub other: u64,
}

impl DiagnosticCounters {
    fn record(&mut self, label: &str) {
        match label {
            "malformed" => self.malformed += 1,
            "length" => self.length += 1,
            "checksum" => self.checksum += 1,
            _ => self.other += 1,
        }
    }

    /// Total rejects of any kind.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.malformed + self.length + self.checksum + self.other
    }
}

struct Subscription {
    filter: PacketFilter,
    once: bool,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

/// Ordered subscriber registry.
#[derive(Default)]
pub struct Dispatcher {
    subs: Vec<Subscription>,
    counters: DiagnosticCounters,
}

impl Dispatcher {
    /// Create an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; events arrive on the returned channel.
    pub fn subscribe(&mut self, filter: PacketFilter) -> mpsc::UnboundedReceiver<EngineEvent> {
        self.register(filter, false)
    }

    /// Register a subscriber that deregisters after its first matching
    /// packet.
    pub fn subscribe_once(&mut self, filter: PacketFilter) -> mpsc::UnboundedReceiver<EngineEvent> {
        self.register(filter, true)
    }

    fn register(&mut self, filter: PacketFilter, once: bool) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subs.push(Subscription { filter, once, tx });
        rx
    }

    /// Deliver a spontaneous packet to matching subscribers, in
    /// registration order. Dropped receivers are pruned as they are
    /// found.
    pub fn publish(&mut self, pkt: &Packet) {
        self.subs.retain_mut(|sub| {
            if !sub.filter.matches(pkt) {
                return !sub.tx.is_closed();
            }
            if sub.tx.send(EngineEvent::Packet(pkt.clone())).is_err() {
                return false;
            }
            !sub.once
        });
    }

    /// Count and surface a codec reject.
    pub fn codec_reject(&mut self, error: &ProtocolError, line: &str) {
        let kind = error.label();
        self.counters.record(kind);
        tracing::warn!(%error, line, "frame rejected");
        self.broadcast(Diagnostic { kind, detail: error.to_string() });
    }

    /// Surface a non-codec observation (binding anomalies and the like).
    pub fn note(&mut self, kind: &'static str, detail: String) {
        self.counters.record(kind);
        tracing::info!(kind, detail = %detail, "diagnostic");
        self.broadcast(Diagnostic { kind, detail });
    }

    /// Reject totals so far.
    #[must_use]
    pub fn counters(&self) -> DiagnosticCounters {
        self.counters
    }

    /// Registered subscriber count (after pruning).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subs.len()
    }

    fn broadcast(&mut self, diagnostic: Diagnostic) {
        self.subs
            .retain_mut(|sub| sub.tx.send(EngineEvent::Diagnostic(diagnostic.clone())).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use ramses_proto::Frame;

    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn packet(verb: Verb, src: &str, code: Code) -> Packet {
        Packet::from_frame(Frame::new(
            Utc::now(),
            verb,
            addr(src),
            Address::NONE,
            code,
            vec![0x00],
        ))
    }

    fn recv_packet(rx: &mut mpsc::UnboundedReceiver<EngineEvent>) -> Option<Packet> {
        match rx.try_recv() {
            Ok(EngineEvent::Packet(pkt)) => Some(pkt),
            _ => None,
        }
    }

    #[test]
    fn filters_route_by_code_verb_src() {
        let mut dispatcher = Dispatcher::new();
        let mut all = dispatcher.subscribe(PacketFilter::any());
        let mut vents = dispatcher.subscribe(PacketFilter::for_code(Code::VENT_STATE));
        let mut one_fan = dispatcher
            .subscribe(PacketFilter::for_code(Code::VENT_STATE).with_src(addr("32:022222")));

        let pkt = packet(Verb::I, "32:033333", Code::VENT_STATE);
        dispatcher.publish(&pkt);

        assert!(recv_packet(&mut all).is_some());
        assert!(recv_packet(&mut vents).is_some());
        assert!(recv_packet(&mut one_fan).is_none());

        let pkt = packet(Verb::I, "32:022222", Code::VENT_STATE);
        dispatcher.publish(&pkt);
        assert!(recv_packet(&mut one_fan).is_some());
    }

    #[test]
    fn delivery_preserves_registration_order() {
        let mut dispatcher = Dispatcher::new();
        let mut first = dispatcher.subscribe(PacketFilter::any());
        let mut second = dispatcher.subscribe(PacketFilter::any());

        let a = packet(Verb::I, "32:022222", Code::FAN_STATE);
        let b = packet(Verb::I, "32:022222", Code::VENT_STATE);
        dispatcher.publish(&a);
        dispatcher.publish(&b);

        for rx in [&mut first, &mut second] {
            assert_eq!(recv_packet(rx).unwrap().code(), Code::FAN_STATE);
            assert_eq!(recv_packet(rx).unwrap().code(), Code::VENT_STATE);
        }
    }

    #[test]
    fn once_subscription_fires_once() {
        let mut dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe_once(PacketFilter::for_code(Code::DEVICE_INFO));

        // non-matching traffic leaves it armed
        dispatcher.publish(&packet(Verb::I, "32:022222", Code::VENT_STATE));
        assert_eq!(dispatcher.subscriber_count(), 1);

        dispatcher.publish(&packet(Verb::I, "32:022222", Code::DEVICE_INFO));
        assert_eq!(dispatcher.subscriber_count(), 0);
        assert!(recv_packet(&mut rx).is_some());

        // no second delivery
        dispatcher.publish(&packet(Verb::I, "32:022222", Code::DEVICE_INFO));
        assert!(recv_packet(&mut rx).is_none());
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut dispatcher = Dispatcher::new();
        let rx = dispatcher.subscribe(PacketFilter::any());
        drop(rx);
        dispatcher.publish(&packet(Verb::I, "32:022222", Code::VENT_STATE));
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn rejects_are_counted_and_surfaced() {
        let mut dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe(PacketFilter::any());

        let error = ProtocolError::Length { declared: 4, actual: 2 };
        dispatcher.codec_reject(&error, "bad line");
        dispatcher.codec_reject(&ProtocolError::Malformed { reason: "x" }, "worse line");

        assert_eq!(dispatcher.counters().length, 1);
        assert_eq!(dispatcher.counters().malformed, 1);
        assert_eq!(dispatcher.counters().total(), 2);

        match rx.try_recv() {
            Ok(EngineEvent::Diagnostic(diag)) => assert_eq!(diag.kind, "length"),
            other => panic!("expected diagnostic, got {other:?}"),
        }
    }
}
