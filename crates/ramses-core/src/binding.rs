//! Device-pairing state machine.
//!
//! Pairing is a four-phase `1FC9` handshake: the supplicant broadcasts a
//! TENDER naming the codes it will publish, a respondent answers with an
//! ACCEPT naming what it will consume, the supplicant confirms with an
//! AFFIRM, and some vendors finish with a `10E0` RATIFY. The context
//! below plays either role; a gateway uses it to emulate a remote or a
//! fan.
//!
//! # State machine
//!
//! ```text
//! Idle ─┬─▶ SuppOfferSent ─▶ SuppReadyConfirm ─▶ SuppReadyRatify ─▶ SuppBound
//!       │        │ (retender ≤ limit, then Failed)
//!       │
//!       └─▶ RespAwaitOffer ─▶ RespAcceptSent ─┬─▶ RespBound
//!                 │ (reaccept ≤ limit)        └─▶ RespAwaitRatify ─▶ RespBound
//!                 │                                     │ (timeout)
//!                 └────────────▶ Failed ◀───────────────┘
//! ```
//!
//! Terminal states are absorbing for the attempt; a fresh context is a
//! fresh attempt. Sending steps retry on timeout; waiting steps fail.

use std::{ops::Sub, time::Duration};

use ramses_proto::{Address, BindTriplet, Code, Command, Packet, Verb};

use crate::{
    config::BindTimers,
    error::{BindError, BindPhase, EngineError},
};

/// Which side of the handshake this context plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindRole {
    /// Requests to be bound (typically a REM)
    Supplicant,
    /// Accepts the binding (typically a FAN)
    Respondent,
}

/// Handshake progress. Only a subset is reachable per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    /// Not started
    Idle,
    /// Tender broadcast, waiting for an accept
    SuppOfferSent,
    /// Accept received, about to confirm
    SuppReadyConfirm,
    /// Confirmation sent, optionally ratifying
    SuppReadyRatify,
    /// Terminal success, supplicant side
    SuppBound,
    /// Passively waiting for a tender
    RespAwaitOffer,
    /// Accept sent, waiting for the confirmation
    RespAcceptSent,
    /// Confirmation received, waiting for the identity addendum
    RespAwaitRatify,
    /// Terminal success, respondent side
    RespBound,
    /// Terminal failure
    Failed,
}

impl BindState {
    /// Whether the attempt is over, successfully or not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SuppBound | Self::RespBound | Self::Failed)
    }
}

/// What a supplicant offers.
#[derive(Debug, Clone)]
pub struct SupplicantSetup {
    /// Codes this device will publish, placed at `idx` in the tender.
    pub offers: Vec<Code>,
    /// Domain id for the offered triplets (`00` Vasco/ClimaRad, `21`
    /// Nuaire).
    pub idx: u8,
    /// OEM byte; when set, the tender advertises identity with an
    /// `oem 10E0 src` triplet and the respondent skips its post-handshake
    /// identity probe.
    pub oem_code: Option<u8>,
    /// Identity announce to broadcast after the confirmation.
    pub ratify: Option<Command>,
}

/// What a respondent will accept.
#[derive(Debug, Clone)]
pub struct RespondentSetup {
    /// Codes listed in the accept (what this device will consume).
    pub accepts: Vec<Code>,
    /// Codes that qualify a tender; when empty, `accepts` is the filter.
    pub offer_filter: Vec<Code>,
    /// Whether the binding only completes after a `10E0` ratify.
    pub require_ratify: bool,
}

impl RespondentSetup {
    /// Accept tenders offering any of `accepts`, requiring no ratify.
    #[must_use]
    pub fn new(accepts: Vec<Code>) -> Self {
        Self { accepts, offer_filter: Vec::new(), require_ratify: false }
    }

    /// Qualify tenders on a different code set than the published one.
    ///
    /// HVAC fans answer a remote's `22F1`/`22F3` offer with their own
    /// `31D9`/`31DA` slots, so the two sets usually differ.
    #[must_use]
    pub fn with_offer_filter(mut self, codes: Vec<Code>) -> Self {
        self.offer_filter = codes;
        self
    }

    /// Require the `10E0` addendum before reporting bound.
    #[must_use]
    pub fn with_ratify_required(mut self) -> Self {
        self.require_ratify = true;
        self
    }
}

enum Setup {
    Supplicant(SupplicantSetup),
    Respondent(RespondentSetup),
}

/// Result of a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOutcome {
    /// Role this context played
    pub role: BindRole,
    /// The device bound to
    pub peer: Address,
    /// Domain id the handshake settled on
    pub idx: u8,
}

/// Actions returned by the context for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAction {
    /// Submit this command through the transaction engine at binding
    /// priority
    Submit(Command),
    /// Resolve the caller's completion slot
    Complete(Result<BindOutcome, BindError>),
    /// Surface an observation worth recording without failing the attempt
    Diagnostic(String),
}

/// One binding attempt for one emulated device.
///
/// Pure state machine over a generic instant, same shape as the
/// transaction engine: packets and ticks in, actions out. The context is
/// retained after it settles so the last outcome stays queryable.
pub struct BindContext<I> {
    device: Address,
    role: BindRole,
    state: BindState,
    timers: BindTimers,
    setup: Setup,
    tender: Option<Packet>,
    accept: Option<Packet>,
    peer: Option<Address>,
    idx: u8,
    attempts: u8,
    waiting_since: Option<I>,
    offer_cmd: Option<Command>,
    accept_cmd: Option<Command>,
}

impl<I> BindContext<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a supplicant-side context for `device`.
    #[must_use]
    pub fn supplicant(device: Address, setup: SupplicantSetup, timers: BindTimers) -> Self {
        Self::new(device, BindRole::Supplicant, Setup::Supplicant(setup), timers)
    }

    /// Create a respondent-side context for `device`.
    #[must_use]
    pub fn respondent(device: Address, setup: RespondentSetup, timers: BindTimers) -> Self {
        Self::new(device, BindRole::Respondent, Setup::Respondent(setup), timers)
    }

    fn new(device: Address, role: BindRole, setup: Setup, timers: BindTimers) -> Self {
        Self {
            device,
            role,
            state: BindState::Idle,
            timers,
            setup,
            tender: None,
            accept: None,
            peer: None,
            idx: 0,
            attempts: 0,
            waiting_since: None,
            offer_cmd: None,
            accept_cmd: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> BindState {
        self.state
    }

    /// Role this context plays.
    #[must_use]
    pub fn role(&self) -> BindRole {
        self.role
    }

    /// The device this context acts as.
    #[must_use]
    pub fn device(&self) -> Address {
        self.device
    }

    /// The peer device, once known.
    #[must_use]
    pub fn peer(&self) -> Option<Address> {
        self.peer
    }

    /// The observed offer packet, once seen.
    #[must_use]
    pub fn tender(&self) -> Option<&Packet> {
        self.tender.as_ref()
    }

    /// The observed accept packet, once seen.
    #[must_use]
    pub fn accept(&self) -> Option<&Packet> {
        self.accept.as_ref()
    }

    /// Begin the attempt.
    ///
    /// A supplicant broadcasts its tender and starts the accept-wait
    /// clock; a respondent just starts listening.
    ///
    /// # Errors
    ///
    /// - [`BindError::InvalidState`] unless the context is `Idle`
    /// - [`BindError::Setup`] when the offer cannot be built
    pub fn start(&mut self, now: I) -> Result<Vec<BindAction>, BindError> {
        if self.state != BindState::Idle {
            return Err(BindError::InvalidState { state: self.state });
        }

        match &self.setup {
            Setup::Supplicant(setup) => {
                let offer =
                    Command::bind_offer(self.device, setup.idx, &setup.offers, setup.oem_code)
                        .map_err(|e| BindError::Setup(e.to_string()))?;
                self.offer_cmd = Some(offer.clone());
                self.idx = setup.idx;
                self.attempts = 1;
                self.waiting_since = Some(now);
                self.state = BindState::SuppOfferSent;
                tracing::debug!(device = %self.device, idx = setup.idx, "tender broadcast");
                Ok(vec![BindAction::Submit(offer)])
            },
            Setup::Respondent(_) => {
                self.state = BindState::RespAwaitOffer;
                tracing::debug!(device = %self.device, "awaiting tender");
                Ok(Vec::new())
            },
        }
    }

    /// Whether the dispatcher should route this packet here.
    ///
    /// Binding only ever cares about `1FC9` and `10E0` traffic that
    /// touches the context's device or its peer; a respondent still
    /// listening also takes any broadcast tender.
    #[must_use]
    pub fn wants(&self, pkt: &Packet) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if pkt.code() != Code::BIND && pkt.code() != Code::DEVICE_INFO {
            return false;
        }
        if pkt.src() == self.device || pkt.dst() == self.device {
            return true;
        }
        if self.peer.is_some_and(|peer| pkt.src() == peer) {
            return true;
        }
        self.state == BindState::RespAwaitOffer
            && pkt.code() == Code::BIND
            && pkt.frame().is_broadcast()
    }

    /// Process a routed packet.
    pub fn handle_packet(&mut self, pkt: &Packet, now: I) -> Vec<BindAction> {
        match self.state {
            BindState::SuppOfferSent => self.on_accept(pkt),
            BindState::RespAwaitOffer => self.on_tender(pkt, now),
            BindState::RespAcceptSent => self.on_affirm(pkt, now),
            BindState::RespAwaitRatify => self.on_ratify(pkt),
            _ => Vec::new(),
        }
    }

    /// Advance deadlines: re-send at sending steps, fail waiting steps.
    pub fn tick(&mut self, now: I) -> Vec<BindAction> {
        let Some(since) = self.waiting_since else {
            return Vec::new();
        };
        let elapsed = now - since;

        match self.state {
            BindState::SuppOfferSent if elapsed >= self.timers.accept_wait => {
                if self.attempts < self.timers.retry_limit {
                    self.attempts += 1;
                    self.waiting_since = Some(now);
                    tracing::debug!(
                        device = %self.device,
                        attempt = self.attempts,
                        "no accept, re-tendering"
                    );
                    match &self.offer_cmd {
                        Some(offer) => vec![BindAction::Submit(offer.clone())],
                        None => Vec::new(),
                    }
                } else {
                    let attempts = self.attempts;
                    self.fail(BindError::RetriesExhausted { phase: BindPhase::Tender, attempts })
                }
            },
            BindState::RespAcceptSent if elapsed >= self.timers.confirm_wait => {
                if self.attempts < self.timers.retry_limit {
                    self.attempts += 1;
                    self.waiting_since = Some(now);
                    tracing::debug!(
                        device = %self.device,
                        attempt = self.attempts,
                        "no affirm, re-accepting"
                    );
                    match &self.accept_cmd {
                        Some(accept) => vec![BindAction::Submit(accept.clone())],
                        None => Vec::new(),
                    }
                } else {
                    let attempts = self.attempts;
                    self.fail(BindError::RetriesExhausted { phase: BindPhase::Accept, attempts })
                }
            },
            BindState::RespAwaitRatify if elapsed >= self.timers.ratify_wait => {
                // waiting step: no retry
                self.fail(BindError::Timeout { phase: BindPhase::Ratify })
            },
            _ => Vec::new(),
        }
    }

    /// Time until this context's deadline, if it has one.
    #[must_use]
    pub fn poll_timeout(&self, now: I) -> Option<Duration> {
        let since = self.waiting_since?;
        let timeout = match self.state {
            BindState::SuppOfferSent => self.timers.accept_wait,
            BindState::RespAcceptSent => self.timers.confirm_wait,
            BindState::RespAwaitRatify => self.timers.ratify_wait,
            _ => return None,
        };
        Some(timeout.saturating_sub(now - since))
    }

    /// Cancel the attempt.
    pub fn cancel(&mut self) -> Vec<BindAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.fail(BindError::Cancelled)
    }

    /// A command this context submitted could not be sent.
    pub fn command_failed(&mut self, error: &EngineError) -> Vec<BindAction> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        tracing::warn!(device = %self.device, %error, "binding send failed");
        self.fail(BindError::SendFailed { reason: error.to_string() })
    }

    // --- supplicant side ---

    /// `SuppOfferSent`: a `1FC9 W` addressed to us is the ACCEPT.
    fn on_accept(&mut self, pkt: &Packet) -> Vec<BindAction> {
        if pkt.verb() != Verb::W || pkt.code() != Code::BIND || pkt.dst() != self.device {
            return Vec::new();
        }
        let Ok(triplets) = BindTriplet::parse_all(pkt.payload()) else {
            return Vec::new();
        };
        let Some(first) = triplets.first() else {
            return Vec::new();
        };

        // the respondent's declared idx wins and is echoed in the affirm
        self.idx = first.idx;
        self.peer = Some(pkt.src());
        self.accept = Some(pkt.clone());
        self.waiting_since = None;
        self.state = BindState::SuppReadyConfirm;
        tracing::debug!(device = %self.device, peer = %pkt.src(), idx = self.idx, "accept received");

        let mut actions =
            vec![BindAction::Submit(Command::bind_confirm(self.device, pkt.src(), self.idx))];
        self.state = BindState::SuppReadyRatify;

        if let Setup::Supplicant(setup) = &self.setup {
            if let Some(ratify) = &setup.ratify {
                actions.push(BindAction::Submit(ratify.clone()));
            }
        }

        self.state = BindState::SuppBound;
        tracing::info!(device = %self.device, peer = %pkt.src(), "bound as supplicant");
        actions.push(BindAction::Complete(Ok(self.outcome(pkt.src()))));
        actions
    }

    // --- respondent side ---

    /// `RespAwaitOffer`: a broadcast `1FC9 I` carrying a qualifying code.
    fn on_tender(&mut self, pkt: &Packet, now: I) -> Vec<BindAction> {
        if pkt.verb() != Verb::I || pkt.code() != Code::BIND || !pkt.frame().is_broadcast() {
            return Vec::new();
        }
        let Ok(triplets) = BindTriplet::parse_all(pkt.payload()) else {
            return Vec::new();
        };
        // a tender always carries the 1FC9 self-slot
        if !triplets.iter().any(|t| t.code == Code::BIND) {
            return Vec::new();
        }

        let Setup::Respondent(setup) = &self.setup else {
            return Vec::new();
        };
        let filter: &[Code] =
            if setup.offer_filter.is_empty() { &setup.accepts } else { &setup.offer_filter };
        let Some(matched) = triplets.iter().find(|t| filter.contains(&t.code)) else {
            tracing::debug!(device = %self.device, src = %pkt.src(), "tender offers nothing we take");
            return Vec::new();
        };

        let mut actions = Vec::new();
        if !triplets.iter().any(|t| t.code == Code::DEVICE_INFO) {
            // without the oem identity slot, a real unit would probe
            // RQ 10E0 after the handshake; flagged for the operator
            actions.push(BindAction::Diagnostic(format!(
                "tender from {} carries no 10E0 slot; vendor may probe identity after binding",
                pkt.src()
            )));
        }

        self.idx = matched.idx;
        self.peer = Some(pkt.src());
        self.tender = Some(pkt.clone());

        let accept =
            match Command::bind_accept(self.device, pkt.src(), self.idx, &setup.accepts) {
                Ok(accept) => accept,
                Err(e) => return self.fail(BindError::Setup(e.to_string())),
            };
        self.accept_cmd = Some(accept.clone());
        self.attempts = 1;
        self.waiting_since = Some(now);
        self.state = BindState::RespAcceptSent;
        tracing::debug!(device = %self.device, peer = %pkt.src(), idx = self.idx, "accepting tender");

        actions.push(BindAction::Submit(accept));
        actions
    }

    /// `RespAcceptSent`: a `1FC9 I` from the supplicant is the AFFIRM.
    ///
    /// Captured traces carry either a one-byte idx or a full echo of the
    /// offer; both are accepted.
    fn on_affirm(&mut self, pkt: &Packet, now: I) -> Vec<BindAction> {
        if pkt.verb() != Verb::I || pkt.code() != Code::BIND {
            return Vec::new();
        }
        if Some(pkt.src()) != self.peer || pkt.dst() != self.device {
            return Vec::new();
        }

        let confirmed = match pkt.payload() {
            [idx] => *idx == self.idx,
            payload => BindTriplet::parse_all(payload).is_ok(),
        };
        if !confirmed {
            tracing::debug!(device = %self.device, "affirm idx mismatch, ignoring");
            return Vec::new();
        }

        let require_ratify = match &self.setup {
            Setup::Respondent(setup) => setup.require_ratify,
            Setup::Supplicant(_) => false,
        };

        if require_ratify {
            self.waiting_since = Some(now);
            self.state = BindState::RespAwaitRatify;
            tracing::debug!(device = %self.device, "affirmed, awaiting ratify");
            Vec::new()
        } else {
            self.settle_respondent()
        }
    }

    /// `RespAwaitRatify`: a `10E0 I` from the supplicant settles it.
    fn on_ratify(&mut self, pkt: &Packet) -> Vec<BindAction> {
        if pkt.verb() != Verb::I || pkt.code() != Code::DEVICE_INFO {
            return Vec::new();
        }
        if Some(pkt.src()) != self.peer {
            return Vec::new();
        }
        self.settle_respondent()
    }

    fn settle_respondent(&mut self) -> Vec<BindAction> {
        self.waiting_since = None;
        self.state = BindState::RespBound;
        let peer = self.peer.unwrap_or(Address::NONE);
        tracing::info!(device = %self.device, %peer, "bound as respondent");
        vec![BindAction::Complete(Ok(self.outcome(peer)))]
    }

    fn outcome(&self, peer: Address) -> BindOutcome {
        BindOutcome { role: self.role, peer, idx: self.idx }
    }

    fn fail(&mut self, error: BindError) -> Vec<BindAction> {
        self.waiting_since = None;
        self.state = BindState::Failed;
        if error != BindError::Cancelled {
            tracing::warn!(device = %self.device, %error, "binding failed");
        }
        vec![BindAction::Complete(Err(error))]
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use chrono::Utc;
    use ramses_proto::Frame;

    use super::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn rem() -> Address {
        addr("29:091138")
    }

    fn fan() -> Address {
        addr("32:022222")
    }

    fn submitted(actions: &[BindAction]) -> Vec<Command> {
        actions
            .iter()
            .filter_map(|action| match action {
                BindAction::Submit(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    fn completion(actions: &[BindAction]) -> Option<Result<BindOutcome, BindError>> {
        actions.iter().find_map(|action| match action {
            BindAction::Complete(result) => Some(result.clone()),
            _ => None,
        })
    }

    fn packet(verb: Verb, src: Address, dst: Address, code: Code, payload: Vec<u8>) -> Packet {
        Packet::from_frame(Frame::new(Utc::now(), verb, src, dst, code, payload))
    }

    fn vasco_supplicant() -> SupplicantSetup {
        SupplicantSetup {
            offers: vec![Code::FAN_MODE, Code::FAN_BOOST],
            idx: 0x00,
            oem_code: Some(0x66),
            ratify: None,
        }
    }

    fn accept_payload(idx: u8, codes: &[Code], src: Address) -> Vec<u8> {
        let triplets: Vec<BindTriplet> =
            codes.iter().map(|&code| BindTriplet { idx, code, addr: src }).collect();
        BindTriplet::encode_all(&triplets).unwrap().to_vec()
    }

    #[test]
    fn supplicant_happy_path() {
        let t0 = Instant::now();
        let mut ctx: BindContext<Instant> =
            BindContext::supplicant(rem(), vasco_supplicant(), BindTimers::default());

        let actions = ctx.start(t0).unwrap();
        let sent = submitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            hex::encode_upper(&sent[0].payload),
            "0022F17564020022F37564026610E0756402001FC9756402"
        );
        assert_eq!(ctx.state(), BindState::SuppOfferSent);

        // the fan accepts with its own published codes
        let accept = packet(
            Verb::W,
            fan(),
            rem(),
            Code::BIND,
            accept_payload(0x00, &[Code::FAN_STATE, Code::VENT_STATE], fan()),
        );
        assert!(ctx.wants(&accept));
        let actions = ctx.handle_packet(&accept, t0);

        // confirm goes out with the respondent's idx, then bound
        let sent = submitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.as_ref(), &[0x00]);
        assert_eq!(sent[0].dst, fan());

        let outcome = completion(&actions).unwrap().unwrap();
        assert_eq!(outcome.role, BindRole::Supplicant);
        assert_eq!(outcome.peer, fan());
        assert_eq!(outcome.idx, 0x00);
        assert_eq!(ctx.state(), BindState::SuppBound);
        assert!(ctx.accept().is_some());
    }

    #[test]
    fn supplicant_sends_ratify_when_supplied() {
        let t0 = Instant::now();
        let mut setup = vasco_supplicant();
        let identity = ramses_proto::Fingerprint::parse(
            &hex::decode(
                "000001C8400F0166FFFFFFFFFFFF0E0207E3564D4E2D31374C4D503031000000000000000000",
            )
            .unwrap(),
        )
        .unwrap();
        setup.ratify = Some(Command::identity_announce(rem(), &identity));

        let mut ctx: BindContext<Instant> =
            BindContext::supplicant(rem(), setup, BindTimers::default());
        ctx.start(t0).unwrap();

        let accept =
            packet(Verb::W, fan(), rem(), Code::BIND, accept_payload(0x00, &[Code::VENT_STATE], fan()));
        let actions = ctx.handle_packet(&accept, t0);

        let sent = submitted(&actions);
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].code, Code::BIND); // affirm first
        assert_eq!(sent[1].code, Code::DEVICE_INFO); // then ratify broadcast
        assert_eq!(sent[1].dst, Address::ALL);
        assert!(completion(&actions).unwrap().is_ok());
    }

    #[test]
    fn supplicant_adopts_respondent_idx() {
        let t0 = Instant::now();
        let mut setup = vasco_supplicant();
        setup.idx = 0x21;
        let mut ctx: BindContext<Instant> =
            BindContext::supplicant(rem(), setup, BindTimers::default());
        ctx.start(t0).unwrap();

        let accept =
            packet(Verb::W, fan(), rem(), Code::BIND, accept_payload(0x21, &[Code::VENT_STATE], fan()));
        let actions = ctx.handle_packet(&accept, t0);
        let sent = submitted(&actions);
        assert_eq!(sent[0].payload.as_ref(), &[0x21]);
        assert_eq!(completion(&actions).unwrap().unwrap().idx, 0x21);
    }

    #[test]
    fn supplicant_retenders_then_fails() {
        let mut now = Instant::now();
        let mut ctx: BindContext<Instant> =
            BindContext::supplicant(rem(), vasco_supplicant(), BindTimers::default());
        ctx.start(now).unwrap();

        // two more tenders, then exhaustion
        for attempt in 2..=3 {
            now += Duration::from_secs(5);
            let actions = ctx.tick(now);
            assert_eq!(submitted(&actions).len(), 1, "attempt {attempt} re-tenders");
            assert_eq!(ctx.state(), BindState::SuppOfferSent);
        }

        now += Duration::from_secs(5);
        let actions = ctx.tick(now);
        assert!(submitted(&actions).is_empty());
        assert_eq!(
            completion(&actions),
            Some(Err(BindError::RetriesExhausted { phase: BindPhase::Tender, attempts: 3 }))
        );
        assert_eq!(ctx.state(), BindState::Failed);
    }

    #[test]
    fn respondent_happy_path() {
        let t0 = Instant::now();
        let setup = RespondentSetup::new(vec![Code::FAN_STATE, Code::VENT_STATE])
            .with_offer_filter(vec![Code::FAN_MODE]);
        let mut ctx: BindContext<Instant> = BindContext::respondent(fan(), setup, BindTimers::default());

        assert!(ctx.start(t0).unwrap().is_empty());
        assert_eq!(ctx.state(), BindState::RespAwaitOffer);

        // the Vasco remote's tender
        let tender_payload =
            hex::decode("0022F17564020022F37564026610E0756402001FC9756402").unwrap();
        let tender = packet(Verb::I, rem(), Address::NONE, Code::BIND, tender_payload);
        assert!(ctx.wants(&tender));
        let actions = ctx.handle_packet(&tender, t0);

        let sent = submitted(&actions);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].verb, Verb::W);
        assert_eq!(sent[0].dst, rem());
        assert_eq!(
            hex::encode_upper(&sent[0].payload),
            "0031D98056CE0031DA8056CE"
        );
        assert_eq!(ctx.state(), BindState::RespAcceptSent);
        // oem slot present: no diagnostic
        assert!(!actions.iter().any(|a| matches!(a, BindAction::Diagnostic(_))));

        // affirm settles it
        let affirm = packet(Verb::I, rem(), fan(), Code::BIND, vec![0x00]);
        let actions = ctx.handle_packet(&affirm, t0);
        let outcome = completion(&actions).unwrap().unwrap();
        assert_eq!(outcome.role, BindRole::Respondent);
        assert_eq!(outcome.peer, rem());
        assert_eq!(ctx.state(), BindState::RespBound);
    }

    #[test]
    fn respondent_flags_tender_without_identity_slot() {
        let t0 = Instant::now();
        let setup = RespondentSetup::new(vec![Code::VENT_STATE])
            .with_offer_filter(vec![Code::FAN_MODE]);
        let mut ctx: BindContext<Instant> = BindContext::respondent(fan(), setup, BindTimers::default());
        ctx.start(t0).unwrap();

        // faked remote: no 10E0 triplet in the tender
        let payload = accept_payload(0x00, &[Code::FAN_MODE, Code::BIND], rem());
        let tender = packet(Verb::I, rem(), Address::NONE, Code::BIND, payload);
        let actions = ctx.handle_packet(&tender, t0);

        assert!(actions.iter().any(|a| matches!(a, BindAction::Diagnostic(_))));
        // still accepts: the ambiguity is recorded, not fatal
        assert_eq!(submitted(&actions).len(), 1);
        assert_eq!(ctx.state(), BindState::RespAcceptSent);
    }

    #[test]
    fn respondent_ignores_non_matching_tender() {
        let t0 = Instant::now();
        let setup = RespondentSetup::new(vec![Code::VENT_STATE])
            .with_offer_filter(vec![Code::FAN_MODE]);
        let mut ctx: BindContext<Instant> = BindContext::respondent(fan(), setup, BindTimers::default());
        ctx.start(t0).unwrap();

        // offers only temperature; nothing we take
        let payload = accept_payload(0x00, &[Code::TEMPERATURE, Code::BIND], rem());
        let tender = packet(Verb::I, rem(), Address::NONE, Code::BIND, payload);
        let actions = ctx.handle_packet(&tender, t0);
        assert!(actions.is_empty());
        assert_eq!(ctx.state(), BindState::RespAwaitOffer);
    }

    #[test]
    fn respondent_echoes_nuaire_idx() {
        let t0 = Instant::now();
        let setup = RespondentSetup::new(vec![Code::VENT_STATE])
            .with_offer_filter(vec![Code::FAN_MODE]);
        let mut ctx: BindContext<Instant> = BindContext::respondent(fan(), setup, BindTimers::default());
        ctx.start(t0).unwrap();

        let payload = accept_payload(0x21, &[Code::FAN_MODE, Code::BIND], rem());
        let tender = packet(Verb::I, rem(), Address::NONE, Code::BIND, payload);
        let actions = ctx.handle_packet(&tender, t0);
        let sent = submitted(&actions);
        // idx 21 echoed verbatim
        assert_eq!(sent[0].payload[0], 0x21);

        // a mismatched affirm idx is ignored
        let wrong = packet(Verb::I, rem(), fan(), Code::BIND, vec![0x00]);
        assert!(ctx.handle_packet(&wrong, t0).is_empty());
        assert_eq!(ctx.state(), BindState::RespAcceptSent);

        let affirm = packet(Verb::I, rem(), fan(), Code::BIND, vec![0x21]);
        let actions = ctx.handle_packet(&affirm, t0);
        assert_eq!(completion(&actions).unwrap().unwrap().idx, 0x21);
    }

    #[test]
    fn respondent_accepts_full_offer_echo_as_affirm() {
        let t0 = Instant::now();
        let setup = RespondentSetup::new(vec![Code::VENT_STATE])
            .with_offer_filter(vec![Code::FAN_MODE]);
        let mut ctx: BindContext<Instant> = BindContext::respondent(fan(), setup, BindTimers::default());
        ctx.start(t0).unwrap();

        let offer = accept_payload(0x00, &[Code::FAN_MODE, Code::BIND], rem());
        let tender = packet(Verb::I, rem(), Address::NONE, Code::BIND, offer.clone());
        ctx.handle_packet(&tender, t0);

        // some remotes re-send the whole offer instead of the idx byte
        let affirm = packet(Verb::I, rem(), fan(), Code::BIND, offer);
        let actions = ctx.handle_packet(&affirm, t0);
        assert!(completion(&actions).unwrap().is_ok());
    }

    #[test]
    fn respondent_ratify_flow_and_timeout() {
        let t0 = Instant::now();
        let setup = RespondentSetup::new(vec![Code::VENT_STATE])
            .with_offer_filter(vec![Code::FAN_MODE])
            .with_ratify_required();
        let mut ctx: BindContext<Instant> =
            BindContext::respondent(fan(), setup.clone(), BindTimers::default());
        ctx.start(t0).unwrap();

        let tender = packet(
            Verb::I,
            rem(),
            Address::NONE,
            Code::BIND,
            accept_payload(0x00, &[Code::FAN_MODE, Code::BIND], rem()),
        );
        ctx.handle_packet(&tender, t0);
        let affirm = packet(Verb::I, rem(), fan(), Code::BIND, vec![0x00]);
        let actions = ctx.handle_packet(&affirm, t0);
        assert!(completion(&actions).is_none());
        assert_eq!(ctx.state(), BindState::RespAwaitRatify);

        // ratify is the identity broadcast
        let ratify = packet(Verb::I, rem(), Address::ALL, Code::DEVICE_INFO, vec![0x00; 38]);
        assert!(ctx.wants(&ratify));
        let actions = ctx.handle_packet(&ratify, t0);
        assert!(completion(&actions).unwrap().is_ok());
        assert_eq!(ctx.state(), BindState::RespBound);

        // same flow, but the ratify never arrives
        let mut ctx: BindContext<Instant> = BindContext::respondent(fan(), setup, BindTimers::default());
        ctx.start(t0).unwrap();
        ctx.handle_packet(&tender, t0);
        ctx.handle_packet(&affirm, t0);
        let actions = ctx.tick(t0 + Duration::from_secs(5));
        assert_eq!(
            completion(&actions),
            Some(Err(BindError::Timeout { phase: BindPhase::Ratify }))
        );
    }

    #[test]
    fn respondent_reaccepts_then_fails() {
        let mut now = Instant::now();
        let setup = RespondentSetup::new(vec![Code::VENT_STATE])
            .with_offer_filter(vec![Code::FAN_MODE]);
        let mut ctx: BindContext<Instant> = BindContext::respondent(fan(), setup, BindTimers::default());
        ctx.start(now).unwrap();

        let tender = packet(
            Verb::I,
            rem(),
            Address::NONE,
            Code::BIND,
            accept_payload(0x00, &[Code::FAN_MODE, Code::BIND], rem()),
        );
        ctx.handle_packet(&tender, now);

        for _ in 0..2 {
            now += Duration::from_secs(3);
            let actions = ctx.tick(now);
            assert_eq!(submitted(&actions).len(), 1);
        }
        now += Duration::from_secs(3);
        let actions = ctx.tick(now);
        assert_eq!(
            completion(&actions),
            Some(Err(BindError::RetriesExhausted { phase: BindPhase::Accept, attempts: 3 }))
        );
    }

    #[test]
    fn terminal_states_are_absorbing() {
        let t0 = Instant::now();
        let mut ctx: BindContext<Instant> =
            BindContext::supplicant(rem(), vasco_supplicant(), BindTimers::default());
        ctx.start(t0).unwrap();

        let accept =
            packet(Verb::W, fan(), rem(), Code::BIND, accept_payload(0x00, &[Code::VENT_STATE], fan()));
        ctx.handle_packet(&accept, t0);
        assert_eq!(ctx.state(), BindState::SuppBound);

        // nothing moves it: packets, ticks, cancels
        assert!(ctx.handle_packet(&accept, t0).is_empty());
        assert!(ctx.tick(t0 + Duration::from_secs(60)).is_empty());
        assert!(ctx.cancel().is_empty());
        assert!(!ctx.wants(&accept));
        assert_eq!(ctx.state(), BindState::SuppBound);

        // restarting a settled context is rejected
        assert_eq!(ctx.start(t0), Err(BindError::InvalidState { state: BindState::SuppBound }));
    }

    #[test]
    fn cancel_mid_attempt() {
        let t0 = Instant::now();
        let mut ctx: BindContext<Instant> =
            BindContext::supplicant(rem(), vasco_supplicant(), BindTimers::default());
        ctx.start(t0).unwrap();

        let actions = ctx.cancel();
        assert_eq!(completion(&actions), Some(Err(BindError::Cancelled)));
        assert_eq!(ctx.state(), BindState::Failed);
    }

    #[test]
    fn send_failure_fails_the_attempt() {
        let t0 = Instant::now();
        let mut ctx: BindContext<Instant> =
            BindContext::supplicant(rem(), vasco_supplicant(), BindTimers::default());
        ctx.start(t0).unwrap();

        let actions = ctx.command_failed(&EngineError::Busy { depth: 64 });
        assert!(matches!(completion(&actions), Some(Err(BindError::SendFailed { .. }))));
        assert_eq!(ctx.state(), BindState::Failed);
    }

    #[test]
    fn empty_offer_is_rejected_at_start() {
        let t0 = Instant::now();
        let setup =
            SupplicantSetup { offers: Vec::new(), idx: 0x00, oem_code: None, ratify: None };
        let mut ctx: BindContext<Instant> = BindContext::supplicant(rem(), setup, BindTimers::default());
        assert!(matches!(ctx.start(t0), Err(BindError::Setup(_))));
    }
}
