//! Half-duplex transaction engine.
//!
//! The radio is a shared single-channel bus, so the engine keeps at most
//! one transaction outside the queue at any time. Uses the action
//! pattern: methods take time as input and return actions for the driver
//! to execute, which keeps the state machine pure and testable.
//!
//! # Transaction lifecycle
//!
//! ```text
//! Queued ──send──▶ AwaitingEcho ──echo──▶ AwaitingReply ──reply──▶ Done
//!    │                   │                      │
//!    │       timeout: immediate re-send    timeout: Backoff, re-send
//!    │                   │                      │
//!    └──── retries exhausted ──▶ Failed ◀───────┘
//! ```
//!
//! The echo step exists because the radio is half-duplex: a serial
//! adapter echoes every written line back on the read stream, and the
//! engine treats that echo as confirmation the frame went to air. An
//! `I` command with no expected reply completes on its echo.

use std::{collections::VecDeque, ops::Sub, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ramses_proto::{Address, Code, Command, Frame, Packet, Priority, Verb};

use crate::{config::EngineConfig, error::EngineError};

/// Identifier of one submitted transaction.
pub type TransactionId = u64;

/// The transmit side of a frame, before it is stamped and serialized.
///
/// The engine matches echoes against this, so it carries exactly the
/// fields the radio transmits; timestamp and RSSI are receiver-local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxFrame {
    /// Verb to transmit with
    pub verb: Verb,
    /// Resolved source address
    pub src: Address,
    /// Destination address
    pub dst: Address,
    /// Command code
    pub code: Code,
    /// Payload bytes
    pub payload: Bytes,
}

impl TxFrame {
    fn from_command(cmd: &Command, src: Address) -> Self {
        Self { verb: cmd.verb, src, dst: cmd.dst, code: cmd.code, payload: cmd.payload.clone() }
    }

    /// Whether an inbound frame is this transmission's echo.
    #[must_use]
    pub fn matches_echo(&self, frame: &Frame) -> bool {
        self.verb == frame.verb
            && self.src == frame.src
            && self.dst == frame.dst
            && self.code == frame.code
            && self.payload == frame.payload
    }

    /// Materialize the frame for serialization.
    #[must_use]
    pub fn to_frame(&self, ts: DateTime<Utc>) -> Frame {
        Frame::new(ts, self.verb, self.src, self.dst, self.code, self.payload.clone())
    }
}

/// Actions returned by the engine for the driver to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeAction {
    /// Write this frame to the transport
    Transmit(TxFrame),
    /// Deliver this packet to the dispatcher (spontaneous traffic)
    Publish(Packet),
    /// Resolve a caller's completion slot
    Complete {
        /// The transaction being completed
        id: TransactionId,
        /// The reply packet (or the echo, for fire-and-forget), or the
        /// tagged failure
        result: Result<Packet, EngineError>,
    },
}

/// Where a transaction currently is, for introspection and invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Waiting in a priority queue
    Queued,
    /// Written, waiting for the transport echo
    AwaitingEcho,
    /// Sleeping between attempts after a reply timeout
    Backoff,
    /// Echo seen, waiting for the expected reply
    AwaitingReply,
}

#[derive(Debug, Clone, Copy)]
enum Phase<I> {
    AwaitingEcho { since: I },
    Backoff { since: I },
    AwaitingReply { since: I },
}

#[derive(Debug)]
struct Active<I> {
    id: TransactionId,
    cmd: Command,
    tx: TxFrame,
    phase: Phase<I>,
    attempts: u8,
}

#[derive(Debug)]
struct Queued {
    id: TransactionId,
    cmd: Command,
}

/// Number of priority classes.
const CLASSES: usize = 3;

fn class_index(priority: Priority) -> usize {
    match priority {
        Priority::Binding => 0,
        Priority::Normal => 1,
        Priority::Probe => 2,
    }
}

/// The transaction engine.
///
/// Pure state machine, generic over `I` to support both real and virtual
/// time. The driver owns the transport; this type only decides what to
/// transmit, what to publish, and what to complete.
#[derive(Debug)]
pub struct Exchange<I> {
    config: EngineConfig,
    queues: [VecDeque<Queued>; CLASSES],
    active: Option<Active<I>>,
    next_id: TransactionId,
}

impl<I> Exchange<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create an idle engine.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            queues: std::array::from_fn(|_| VecDeque::new()),
            active: None,
            next_id: 1,
        }
    }

    /// Whether a transaction is outside the queue right now.
    ///
    /// Never more than one is; this is the engine's core invariant.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.active.is_some()
    }

    /// Transactions waiting in the queues.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    /// State of a known transaction, `None` once completed.
    #[must_use]
    pub fn state_of(&self, id: TransactionId) -> Option<TransactionState> {
        if let Some(active) = &self.active {
            if active.id == id {
                return Some(match active.phase {
                    Phase::AwaitingEcho { .. } => TransactionState::AwaitingEcho,
                    Phase::Backoff { .. } => TransactionState::Backoff,
                    Phase::AwaitingReply { .. } => TransactionState::AwaitingReply,
                });
            }
        }
        self.queues
            .iter()
            .flatten()
            .any(|queued| queued.id == id)
            .then_some(TransactionState::Queued)
    }

    /// Submit a command.
    ///
    /// Returns the transaction id and any immediately runnable actions
    /// (the transmit, when the medium is free).
    ///
    /// # Errors
    ///
    /// - [`EngineError::ReadOnly`] in listen-only mode
    /// - [`EngineError::Busy`] when the queue is at its limit
    pub fn submit(
        &mut self,
        cmd: Command,
        now: I,
    ) -> Result<(TransactionId, Vec<ExchangeAction>), EngineError> {
        if self.config.read_only {
            return Err(EngineError::ReadOnly);
        }
        let depth = self.queue_depth() + usize::from(self.active.is_some());
        if depth >= self.config.queue_limit {
            return Err(EngineError::Busy { depth });
        }

        let id = self.next_id;
        self.next_id += 1;
        tracing::debug!(id, hdr = %cmd.hdr(), priority = ?cmd.priority, "transaction queued");
        self.queues[class_index(cmd.priority)].push_back(Queued { id, cmd });

        let mut actions = Vec::new();
        self.pump(now, &mut actions);
        Ok((id, actions))
    }

    /// Cancel a queued or in-flight transaction.
    ///
    /// An in-flight cancel does not recall the radio bytes; the slot
    /// completes with `Cancelled` and a late matching reply will surface
    /// as spontaneous traffic. Unknown ids are a no-op.
    pub fn cancel(&mut self, id: TransactionId, now: I) -> Vec<ExchangeAction> {
        let mut actions = Vec::new();

        if self.active.as_ref().is_some_and(|active| active.id == id) {
            self.conclude(Err(EngineError::Cancelled), &mut actions);
            self.pump(now, &mut actions);
            return actions;
        }

        for queue in &mut self.queues {
            if let Some(pos) = queue.iter().position(|queued| queued.id == id) {
                let queued = queue.remove(pos);
                if let Some(queued) = queued {
                    actions.push(ExchangeAction::Complete {
                        id: queued.id,
                        result: Err(EngineError::Cancelled),
                    });
                }
                return actions;
            }
        }
        actions
    }

    /// Process an inbound packet.
    ///
    /// Exactly one of three things happens: the packet is consumed as the
    /// active transaction's echo (never published), consumed as its reply
    /// (delivered through the completion, not the dispatcher), or
    /// published as spontaneous traffic.
    pub fn handle_packet(&mut self, pkt: &Packet, now: I) -> Vec<ExchangeAction> {
        let mut actions = Vec::new();

        let Some(active) = self.active.as_mut() else {
            actions.push(ExchangeAction::Publish(pkt.clone()));
            return actions;
        };

        match active.phase {
            Phase::AwaitingEcho { .. } if active.tx.matches_echo(pkt.frame()) => {
                if active.cmd.expect_reply {
                    tracing::debug!(id = active.id, "echo matched, awaiting reply");
                    active.phase = Phase::AwaitingReply { since: now };
                } else {
                    tracing::debug!(id = active.id, "echo matched, complete");
                    let echo = pkt.clone();
                    self.conclude(Ok(echo), &mut actions);
                    self.pump(now, &mut actions);
                }
            },
            // a late reply during backoff still settles the transaction
            Phase::AwaitingReply { .. } | Phase::Backoff { .. }
                if reply_matches(&active.cmd, active.tx.src, pkt) =>
            {
                tracing::debug!(id = active.id, hdr = %pkt.hdr(), "reply matched");
                let reply = pkt.clone();
                self.conclude(Ok(reply), &mut actions);
                self.pump(now, &mut actions);
            },
            _ => actions.push(ExchangeAction::Publish(pkt.clone())),
        }

        actions
    }

    /// Advance deadlines: expire waits, schedule retries, fail out.
    pub fn tick(&mut self, now: I) -> Vec<ExchangeAction> {
        let mut actions = Vec::new();

        if let Some(active) = self.active.as_mut() {
            match active.phase {
                Phase::AwaitingEcho { since } if now - since >= self.config.echo_timeout => {
                    if active.attempts <= retry_limit(&active.cmd, &self.config) {
                        // echo loss: the write probably never hit the air
                        active.attempts += 1;
                        active.phase = Phase::AwaitingEcho { since: now };
                        tracing::debug!(
                            id = active.id,
                            attempt = active.attempts,
                            "echo timeout, re-sending"
                        );
                        actions.push(ExchangeAction::Transmit(active.tx.clone()));
                    } else {
                        let attempts = active.attempts;
                        tracing::warn!(id = active.id, attempts, "echo never arrived, giving up");
                        self.conclude(Err(EngineError::RetriesExhausted { attempts }), &mut actions);
                    }
                },
                Phase::AwaitingReply { since } if now - since >= reply_timeout(&active.cmd, &self.config) => {
                    if active.attempts <= retry_limit(&active.cmd, &self.config) {
                        active.phase = Phase::Backoff { since: now };
                        tracing::debug!(id = active.id, "reply timeout, backing off");
                    } else {
                        let attempts = active.attempts;
                        tracing::warn!(id = active.id, attempts, "reply never arrived, giving up");
                        self.conclude(Err(EngineError::RetriesExhausted { attempts }), &mut actions);
                    }
                },
                Phase::Backoff { since } if now - since >= self.config.retry_backoff => {
                    active.attempts += 1;
                    active.phase = Phase::AwaitingEcho { since: now };
                    tracing::debug!(id = active.id, attempt = active.attempts, "re-sending");
                    actions.push(ExchangeAction::Transmit(active.tx.clone()));
                },
                _ => {},
            }
        }

        self.pump(now, &mut actions);
        actions
    }

    /// Time until the earliest deadline, given the current instant.
    ///
    /// `None` when nothing is in flight; the driver can sleep forever.
    #[must_use]
    pub fn poll_timeout(&self, now: I) -> Option<Duration> {
        let active = self.active.as_ref()?;
        let (since, timeout) = match active.phase {
            Phase::AwaitingEcho { since } => (since, self.config.echo_timeout),
            Phase::AwaitingReply { since } => (since, reply_timeout(&active.cmd, &self.config)),
            Phase::Backoff { since } => (since, self.config.retry_backoff),
        };
        Some(timeout.saturating_sub(now - since))
    }

    /// Fail everything: the transport is gone.
    ///
    /// Every queued and in-flight transaction completes with a clone of
    /// `error`.
    pub fn fail_all(&mut self, error: &EngineError) -> Vec<ExchangeAction> {
        let mut actions = Vec::new();
        if let Some(active) = self.active.take() {
            actions.push(ExchangeAction::Complete { id: active.id, result: Err(error.clone()) });
        }
        for queue in &mut self.queues {
            for queued in queue.drain(..) {
                actions
                    .push(ExchangeAction::Complete { id: queued.id, result: Err(error.clone()) });
            }
        }
        actions
    }

    /// Start the next queued transaction if the medium is free.
    fn pump(&mut self, now: I, actions: &mut Vec<ExchangeAction>) {
        if self.active.is_some() {
            return;
        }
        let Some(queued) = self.queues.iter_mut().find_map(VecDeque::pop_front) else {
            return;
        };

        let src = queued.cmd.src.unwrap_or(self.config.gateway);
        let tx = TxFrame::from_command(&queued.cmd, src);
        tracing::debug!(id = queued.id, hdr = %queued.cmd.hdr(), "transmitting");
        actions.push(ExchangeAction::Transmit(tx.clone()));
        self.active = Some(Active {
            id: queued.id,
            cmd: queued.cmd,
            tx,
            phase: Phase::AwaitingEcho { since: now },
            attempts: 1,
        });
    }

    /// Complete the active transaction and free the medium.
    fn conclude(&mut self, result: Result<Packet, EngineError>, actions: &mut Vec<ExchangeAction>) {
        if let Some(active) = self.active.take() {
            actions.push(ExchangeAction::Complete { id: active.id, result });
        }
    }
}

fn retry_limit(cmd: &Command, config: &EngineConfig) -> u8 {
    cmd.retries.unwrap_or(config.retry_limit)
}

fn reply_timeout(cmd: &Command, config: &EngineConfig) -> Duration {
    cmd.timeout.unwrap_or(config.reply_timeout)
}

/// Whether a packet answers the given command.
///
/// The reply must come back along the flipped src/dst pair with the
/// expected verb, the same code, and the same context. A frame matching
/// (code, ctx) from any other source stays spontaneous.
fn reply_matches(cmd: &Command, our_src: Address, pkt: &Packet) -> bool {
    let Some(reply_verb) = cmd.verb.expected_reply() else {
        return false;
    };
    pkt.verb() == reply_verb
        && pkt.code() == cmd.code
        && pkt.src() == cmd.dst
        && pkt.dst() == our_src
        && cmd.ctx() == pkt.ctx()
}
