//! The engine runtime.
//!
//! One task owns everything: the transport, the transaction engine, the
//! dispatcher, and the binding contexts. A single select loop drains the
//! transport's inbound stream, services caller requests, and advances
//! the earliest FSM deadline. The state machines stay pure; this module
//! is the only place that touches I/O or the clock.
//!
//! Callers talk to the loop through an [`EngineHandle`]; completion
//! travels back over oneshot channels, subscriptions over unbounded
//! channels.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use ramses_proto::{Address, Command, Frame, Packet};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};

use crate::{
    binding::{BindAction, BindContext, BindOutcome, RespondentSetup, SupplicantSetup},
    config::EngineConfig,
    dispatcher::{Dispatcher, DiagnosticCounters, EngineEvent, PacketFilter},
    error::{BindError, EngineError},
    exchange::{Exchange, ExchangeAction, TransactionId},
    transport::{is_out_of_band, Transport},
};

/// Depth of the request channel between handles and the loop.
const REQUEST_CHANNEL_DEPTH: usize = 32;

enum EngineRequest {
    Send {
        token: u64,
        cmd: Command,
        notify: oneshot::Sender<Result<Packet, EngineError>>,
    },
    Cancel {
        token: u64,
    },
    Subscribe {
        filter: PacketFilter,
        once: bool,
        notify: oneshot::Sender<mpsc::UnboundedReceiver<EngineEvent>>,
    },
    BindSupplicant {
        device: Address,
        setup: SupplicantSetup,
        notify: oneshot::Sender<Result<BindOutcome, BindError>>,
    },
    BindRespondent {
        device: Address,
        setup: RespondentSetup,
        notify: oneshot::Sender<Result<BindOutcome, BindError>>,
    },
    Counters {
        notify: oneshot::Sender<DiagnosticCounters>,
    },
    Shutdown,
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::Sender<EngineRequest>,
    next_token: Arc<AtomicU64>,
}

impl EngineHandle {
    /// Submit a command and wait for its result: the reply packet for
    /// RQ/W, or the echoed transmission for fire-and-forget.
    ///
    /// # Errors
    ///
    /// Any [`EngineError`]; `Stopped` when the engine task is gone.
    pub async fn send_command(&self, cmd: Command) -> Result<Packet, EngineError> {
        self.submit(cmd).await?.wait().await
    }

    /// Submit a command, keeping a handle for cancellation.
    ///
    /// # Errors
    ///
    /// `Stopped` when the engine task is gone.
    pub async fn submit(&self, cmd: Command) -> Result<PendingCommand, EngineError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(EngineRequest::Send { token, cmd, notify: tx })
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(PendingCommand { handle: self.clone(), token, rx })
    }

    /// Subscribe to spontaneous packets and diagnostics.
    ///
    /// # Errors
    ///
    /// `Stopped` when the engine task is gone.
    pub async fn subscribe(
        &self,
        filter: PacketFilter,
    ) -> Result<mpsc::UnboundedReceiver<EngineEvent>, EngineError> {
        self.subscribe_inner(filter, false).await
    }

    /// Subscribe for exactly one matching packet.
    ///
    /// # Errors
    ///
    /// `Stopped` when the engine task is gone.
    pub async fn subscribe_once(
        &self,
        filter: PacketFilter,
    ) -> Result<mpsc::UnboundedReceiver<EngineEvent>, EngineError> {
        self.subscribe_inner(filter, true).await
    }

    async fn subscribe_inner(
        &self,
        filter: PacketFilter,
        once: bool,
    ) -> Result<mpsc::UnboundedReceiver<EngineEvent>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(EngineRequest::Subscribe { filter, once, notify: tx })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Run a supplicant binding attempt for an emulated device.
    ///
    /// # Errors
    ///
    /// The binding failure, or `Stopped` when the engine task is gone.
    pub async fn bind_supplicant(
        &self,
        device: Address,
        setup: SupplicantSetup,
    ) -> Result<BindOutcome, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(EngineRequest::BindSupplicant { device, setup, notify: tx })
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(rx.await.map_err(|_| EngineError::Stopped)??)
    }

    /// Run a respondent binding attempt for an emulated device.
    ///
    /// # Errors
    ///
    /// The binding failure, or `Stopped` when the engine task is gone.
    pub async fn bind_respondent(
        &self,
        device: Address,
        setup: RespondentSetup,
    ) -> Result<BindOutcome, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(EngineRequest::BindRespondent { device, setup, notify: tx })
            .await
            .map_err(|_| EngineError::Stopped)?;
        Ok(rx.await.map_err(|_| EngineError::Stopped)??)
    }

    /// Codec reject totals so far.
    ///
    /// # Errors
    ///
    /// `Stopped` when the engine task is gone.
    pub async fn counters(&self) -> Result<DiagnosticCounters, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(EngineRequest::Counters { notify: tx })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Stop the engine; queued work completes with `Cancelled`.
    pub async fn shutdown(&self) {
        let _ = self.requests.send(EngineRequest::Shutdown).await;
    }
}

/// A submitted command that can still be cancelled.
pub struct PendingCommand {
    handle: EngineHandle,
    token: u64,
    rx: oneshot::Receiver<Result<Packet, EngineError>>,
}

impl PendingCommand {
    /// Wait for the transaction to settle.
    ///
    /// # Errors
    ///
    /// The transaction's failure, or `Stopped` when the engine is gone.
    pub async fn wait(self) -> Result<Packet, EngineError> {
        self.rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Request cooperative cancellation; the slot settles `Cancelled`.
    pub async fn cancel(&self) {
        let _ = self.handle.requests.send(EngineRequest::Cancel { token: self.token }).await;
    }
}

struct BindSlot {
    ctx: BindContext<Instant>,
    notify: Option<oneshot::Sender<Result<BindOutcome, BindError>>>,
}

/// The engine: transport owner and FSM driver.
pub struct Engine<T: Transport> {
    transport: T,
    config: EngineConfig,
    exchange: Exchange<Instant>,
    dispatcher: Dispatcher,
    binds: HashMap<Address, BindSlot>,
    pending: HashMap<TransactionId, (u64, oneshot::Sender<Result<Packet, EngineError>>)>,
    tokens: HashMap<u64, TransactionId>,
    bind_owned: HashMap<TransactionId, Address>,
    requests: mpsc::Receiver<EngineRequest>,
}

impl<T: Transport> Engine<T> {
    /// Build an engine around a transport.
    #[must_use]
    pub fn new(transport: T, config: EngineConfig) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_DEPTH);
        let engine = Self {
            transport,
            exchange: Exchange::new(config.clone()),
            config,
            dispatcher: Dispatcher::new(),
            binds: HashMap::new(),
            pending: HashMap::new(),
            tokens: HashMap::new(),
            bind_owned: HashMap::new(),
            requests: rx,
        };
        let handle = EngineHandle { requests: tx, next_token: Arc::new(AtomicU64::new(1)) };
        (engine, handle)
    }

    /// Run until shutdown or a transport fault.
    ///
    /// # Errors
    ///
    /// `Transport` when the stream ends or a read/write fails; all
    /// pending work is failed before returning.
    pub async fn run(mut self) -> Result<(), EngineError> {
        tracing::info!(
            gateway = %self.config.gateway,
            read_only = self.config.read_only,
            "engine running"
        );

        loop {
            let sleep_for = self.poll_timeout();
            tokio::select! {
                inbound = self.transport.recv_line() => match inbound {
                    Some(Ok(line)) => self.handle_line(&line).await?,
                    Some(Err(error)) => {
                        let reason = error.to_string();
                        self.fault(&reason);
                        return Err(EngineError::Transport(reason));
                    },
                    None => {
                        let reason = "transport closed".to_string();
                        self.fault(&reason);
                        return Err(EngineError::Transport(reason));
                    },
                },
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if self.handle_request(request).await? {
                            self.shutdown_now();
                            return Ok(());
                        }
                    },
                    None => {
                        self.shutdown_now();
                        return Ok(());
                    },
                },
                () = idle(sleep_for) => {
                    self.on_deadline().await?;
                },
            }
        }
    }

    /// Earliest deadline across both FSMs, as a sleep duration.
    fn poll_timeout(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut earliest = self.exchange.poll_timeout(now);
        for slot in self.binds.values() {
            if let Some(remaining) = slot.ctx.poll_timeout(now) {
                earliest = Some(earliest.map_or(remaining, |current| current.min(remaining)));
            }
        }
        earliest
    }

    async fn on_deadline(&mut self) -> Result<(), EngineError> {
        let now = Instant::now();
        let actions = self.exchange.tick(now);
        self.run_actions(actions).await?;

        let devices: Vec<Address> = self.binds.keys().copied().collect();
        for device in devices {
            let Some(slot) = self.binds.get_mut(&device) else { continue };
            let actions = slot.ctx.tick(now);
            let follow = self.apply_bind_actions(device, actions);
            self.run_actions(follow).await?;
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: &str) -> Result<(), EngineError> {
        if is_out_of_band(line) {
            tracing::trace!(line, "out-of-band line");
            return Ok(());
        }
        match Frame::decode(line) {
            Err(error) => {
                self.dispatcher.codec_reject(&error, line);
                Ok(())
            },
            Ok(frame) => {
                tracing::trace!(line, "rx");
                let pkt = Packet::from_frame(frame);
                let actions = self.exchange.handle_packet(&pkt, Instant::now());
                self.run_actions(actions).await
            },
        }
    }

    async fn handle_request(&mut self, request: EngineRequest) -> Result<bool, EngineError> {
        match request {
            EngineRequest::Send { token, cmd, notify } => {
                match self.exchange.submit(cmd, Instant::now()) {
                    Ok((id, actions)) => {
                        self.tokens.insert(token, id);
                        self.pending.insert(id, (token, notify));
                        self.run_actions(actions).await?;
                    },
                    Err(error) => {
                        let _ = notify.send(Err(error));
                    },
                }
                Ok(false)
            },
            EngineRequest::Cancel { token } => {
                if let Some(id) = self.tokens.get(&token).copied() {
                    let actions = self.exchange.cancel(id, Instant::now());
                    self.run_actions(actions).await?;
                }
                Ok(false)
            },
            EngineRequest::Subscribe { filter, once, notify } => {
                let rx = if once {
                    self.dispatcher.subscribe_once(filter)
                } else {
                    self.dispatcher.subscribe(filter)
                };
                let _ = notify.send(rx);
                Ok(false)
            },
            EngineRequest::BindSupplicant { device, setup, notify } => {
                let ctx = BindContext::supplicant(device, setup, self.config.bind.clone());
                self.start_bind(ctx, notify).await?;
                Ok(false)
            },
            EngineRequest::BindRespondent { device, setup, notify } => {
                let ctx = BindContext::respondent(device, setup, self.config.bind.clone());
                self.start_bind(ctx, notify).await?;
                Ok(false)
            },
            EngineRequest::Counters { notify } => {
                let _ = notify.send(self.dispatcher.counters());
                Ok(false)
            },
            EngineRequest::Shutdown => Ok(true),
        }
    }

    async fn start_bind(
        &mut self,
        mut ctx: BindContext<Instant>,
        notify: oneshot::Sender<Result<BindOutcome, BindError>>,
    ) -> Result<(), EngineError> {
        let device = ctx.device();

        // a fresh initiate replaces the device's previous attempt
        if let Some(mut old) = self.binds.remove(&device) {
            for action in old.ctx.cancel() {
                if let BindAction::Complete(result) = action {
                    if let Some(tx) = old.notify.take() {
                        let _ = tx.send(result);
                    }
                }
            }
        }

        match ctx.start(Instant::now()) {
            Err(error) => {
                let _ = notify.send(Err(error));
                Ok(())
            },
            Ok(actions) => {
                self.binds.insert(device, BindSlot { ctx, notify: Some(notify) });
                let follow = self.apply_bind_actions(device, actions);
                self.run_actions(follow).await
            },
        }
    }

    /// Execute engine actions, looping until the worklist drains.
    ///
    /// Locally synthesized echoes and binding submissions feed actions
    /// back into the list, so this is a queue rather than recursion.
    async fn run_actions(&mut self, actions: Vec<ExchangeAction>) -> Result<(), EngineError> {
        let mut work: VecDeque<ExchangeAction> = actions.into();
        while let Some(action) = work.pop_front() {
            match action {
                ExchangeAction::Transmit(tx) => {
                    let frame = tx.to_frame(Utc::now());
                    let line = frame.encode();
                    tracing::trace!(%line, "tx");
                    if let Err(error) = self.transport.send_line(&line).await {
                        let reason = error.to_string();
                        self.fault(&reason);
                        return Err(EngineError::Transport(reason));
                    }
                    if !self.transport.echoes() {
                        let pkt = Packet::from_frame(frame);
                        work.extend(self.exchange.handle_packet(&pkt, Instant::now()));
                    }
                },
                ExchangeAction::Publish(pkt) => {
                    let follow = self.route_packet(&pkt);
                    work.extend(follow);
                },
                ExchangeAction::Complete { id, result } => {
                    let follow = self.complete(id, result);
                    work.extend(follow);
                },
            }
        }
        Ok(())
    }

    /// Deliver a spontaneous packet: binding contexts first, then
    /// subscribers in registration order.
    fn route_packet(&mut self, pkt: &Packet) -> Vec<ExchangeAction> {
        let now = Instant::now();
        let mut out = Vec::new();
        let devices: Vec<Address> = self.binds.keys().copied().collect();
        for device in devices {
            let actions = match self.binds.get_mut(&device) {
                Some(slot) if slot.ctx.wants(pkt) => slot.ctx.handle_packet(pkt, now),
                _ => continue,
            };
            out.extend(self.apply_bind_actions(device, actions));
        }
        self.dispatcher.publish(pkt);
        out
    }

    /// Turn binding actions into engine work.
    fn apply_bind_actions(
        &mut self,
        device: Address,
        actions: Vec<BindAction>,
    ) -> Vec<ExchangeAction> {
        let mut out = Vec::new();
        for action in actions {
            match action {
                BindAction::Submit(cmd) => match self.exchange.submit(cmd, Instant::now()) {
                    Ok((id, follow)) => {
                        self.bind_owned.insert(id, device);
                        out.extend(follow);
                    },
                    Err(error) => {
                        let follow = self
                            .binds
                            .get_mut(&device)
                            .map(|slot| slot.ctx.command_failed(&error))
                            .unwrap_or_default();
                        out.extend(self.apply_bind_actions(device, follow));
                    },
                },
                BindAction::Complete(result) => {
                    if let Some(slot) = self.binds.get_mut(&device) {
                        if let Some(tx) = slot.notify.take() {
                            let _ = tx.send(result);
                        }
                    }
                },
                BindAction::Diagnostic(detail) => {
                    self.dispatcher.note("binding", detail);
                },
            }
        }
        out
    }

    /// Resolve a transaction completion to its owner.
    fn complete(
        &mut self,
        id: TransactionId,
        result: Result<Packet, EngineError>,
    ) -> Vec<ExchangeAction> {
        if let Some(device) = self.bind_owned.remove(&id) {
            if let Err(error) = &result {
                let actions = self
                    .binds
                    .get_mut(&device)
                    .map(|slot| slot.ctx.command_failed(error))
                    .unwrap_or_default();
                return self.apply_bind_actions(device, actions);
            }
            return Vec::new();
        }

        if let Some((token, notify)) = self.pending.remove(&id) {
            self.tokens.remove(&token);
            let _ = notify.send(result);
        }
        Vec::new()
    }

    /// Transport fault: fail every binding attempt and transaction.
    fn fault(&mut self, reason: &str) {
        tracing::error!(reason, "transport fault, stopping");
        let error = EngineError::Transport(reason.to_string());
        self.fail_everything(&error);
    }

    /// Graceful stop: pending work completes `Cancelled`.
    fn shutdown_now(&mut self) {
        tracing::info!("engine shutting down");
        self.fail_everything(&EngineError::Cancelled);
    }

    fn fail_everything(&mut self, error: &EngineError) {
        // binding contexts first so they submit nothing new
        let devices: Vec<Address> = self.binds.keys().copied().collect();
        for device in devices {
            let Some(slot) = self.binds.get_mut(&device) else { continue };
            let actions = if *error == EngineError::Cancelled {
                slot.ctx.cancel()
            } else {
                slot.ctx.command_failed(error)
            };
            for action in actions {
                if let BindAction::Complete(result) = action {
                    if let Some(slot) = self.binds.get_mut(&device) {
                        if let Some(tx) = slot.notify.take() {
                            let _ = tx.send(result);
                        }
                    }
                }
            }
        }

        for action in self.exchange.fail_all(error) {
            if let ExchangeAction::Complete { id, result } = action {
                self.bind_owned.remove(&id);
                if let Some((token, notify)) = self.pending.remove(&id) {
                    self.tokens.remove(&token);
                    let _ = notify.send(result);
                }
            }
        }
    }
}

async fn idle(timeout: Option<Duration>) {
    match timeout {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
