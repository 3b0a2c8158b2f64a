use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, Sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::Chunker;
use crate::config::{IngestConfig, PublishConfig};
use crate::endpoint::build_ingest_url;
use crate::errors::TransportError;
use crate::transport::{IngestConnection, IngestTransport};
use crate::types::{BackoffPolicy, Chunk, ConnectionState, SessionCredentials, WatermarkPolicy};

/// Events emitted over the life of a publish connection.
#[derive(Debug, Clone)]
pub enum PublishEvent {
    StateChanged { state: ConnectionState },
    ChunkSent { bytes: usize },
    ProductionPaused { buffered: u64 },
    ProductionResumed,
    RetryScheduled { attempt: u32, delay: Duration },
    RetryLimitExceeded { attempts: u32 },
}

/// Event handler trait for receiving publish events.
pub trait PublishEventHandler: Send + Sync {
    fn handle_event(&self, event: PublishEvent);
}

/// Default handler that logs every event.
pub struct ConsolePublishEventHandler;

impl PublishEventHandler for ConsolePublishEventHandler {
    fn handle_event(&self, event: PublishEvent) {
        match event {
            PublishEvent::StateChanged { state } => info!("publish state: {}", state),
            PublishEvent::ChunkSent { bytes } => debug!("chunk sent: {} bytes", bytes),
            PublishEvent::ProductionPaused { buffered } => {
                warn!("production paused, {} bytes buffered", buffered)
            }
            PublishEvent::ProductionResumed => info!("production resumed"),
            PublishEvent::RetryScheduled { attempt, delay } => {
                info!("reconnect attempt {} in {:?}", attempt, delay)
            }
            PublishEvent::RetryLimitExceeded { attempts } => {
                warn!("giving up after {} reconnect attempts", attempts)
            }
        }
    }
}

/// Inputs to the connection state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineInput {
    StartRequested,
    HandshakeSucceeded,
    HandshakeFailed,
    TransportClosed,
    RetryTimerFired,
    StopRequested,
}

/// Side effects requested by a state transition, to be executed by the
/// driver in order.
#[derive(Debug, Clone)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    StartChunker,
    StopChunker,
    StartKeepalive,
    CancelKeepalive,
    ScheduleRetry(Duration),
    CancelRetry,
    Notify(PublishEvent),
}

/// Pure connection state machine. Holds no IO resources: every `on_event`
/// call returns the ordered effects the caller must carry out.
///
/// `attempt` counts consecutive reconnect attempts and resets to zero on
/// every successful handshake, so each outage gets the full retry schedule.
pub struct PublishMachine {
    state: ConnectionState,
    attempt: u32,
    policy: BackoffPolicy,
}

impl PublishMachine {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempt: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn on_event(&mut self, input: MachineInput) -> Vec<Effect> {
        match (self.state, input) {
            (ConnectionState::Idle, MachineInput::StartRequested) => {
                self.attempt = 0;
                self.to(ConnectionState::Connecting, vec![Effect::OpenTransport])
            }
            (ConnectionState::Connecting, MachineInput::HandshakeSucceeded) => {
                self.attempt = 0;
                self.to(
                    ConnectionState::Publishing,
                    vec![Effect::StartChunker, Effect::StartKeepalive],
                )
            }
            (ConnectionState::Connecting, MachineInput::HandshakeFailed) => {
                self.decide_retry(Vec::new())
            }
            (ConnectionState::Publishing, MachineInput::TransportClosed) => {
                // The closed state is momentary but observable: consumers see
                // it before the machine settles on backoff-wait or failed.
                let mut effects = vec![Effect::StopChunker, Effect::CancelKeepalive];
                self.state = ConnectionState::Closed;
                effects.push(Effect::Notify(PublishEvent::StateChanged {
                    state: ConnectionState::Closed,
                }));
                self.decide_retry(effects)
            }
            (ConnectionState::BackoffWait, MachineInput::RetryTimerFired) => {
                self.to(ConnectionState::Connecting, vec![Effect::OpenTransport])
            }
            (_, MachineInput::StopRequested) => self.stop_effects(),
            _ => Vec::new(),
        }
    }

    fn to(&mut self, state: ConnectionState, mut effects: Vec<Effect>) -> Vec<Effect> {
        self.state = state;
        effects.push(Effect::Notify(PublishEvent::StateChanged { state }));
        effects
    }

    fn decide_retry(&mut self, mut effects: Vec<Effect>) -> Vec<Effect> {
        if self.attempt >= self.policy.max_retries {
            effects.push(Effect::Notify(PublishEvent::RetryLimitExceeded {
                attempts: self.attempt,
            }));
            self.state = ConnectionState::Failed;
            effects.push(Effect::Notify(PublishEvent::StateChanged {
                state: ConnectionState::Failed,
            }));
        } else {
            self.attempt += 1;
            let delay = self.policy.delay_for(self.attempt);
            effects.push(Effect::ScheduleRetry(delay));
            effects.push(Effect::Notify(PublishEvent::RetryScheduled {
                attempt: self.attempt,
                delay,
            }));
            self.state = ConnectionState::BackoffWait;
            effects.push(Effect::Notify(PublishEvent::StateChanged {
                state: ConnectionState::BackoffWait,
            }));
        }
        effects
    }

    /// Stop is legal in every state and always lands on idle.
    fn stop_effects(&mut self) -> Vec<Effect> {
        let effects = match self.state {
            ConnectionState::Idle => return Vec::new(),
            ConnectionState::Publishing => vec![
                Effect::StopChunker,
                Effect::CancelKeepalive,
                Effect::CloseTransport,
            ],
            ConnectionState::Connecting => vec![Effect::CloseTransport],
            ConnectionState::BackoffWait => vec![Effect::CancelRetry],
            ConnectionState::Closed | ConnectionState::Failed => Vec::new(),
        };
        self.attempt = 0;
        self.to(ConnectionState::Idle, effects)
    }
}

enum Command {
    Stop { ack: oneshot::Sender<()> },
    SwapStream(broadcast::Sender<Bytes>),
}

/// One publish lifetime: starts on construction, ends on `stop` (or on the
/// retry limit). The publisher id is fixed for the whole lifetime so the
/// ingest endpoint can correlate reconnects.
pub struct PublishConnection {
    publisher_id: Uuid,
    cmd_tx: mpsc::Sender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl PublishConnection {
    pub fn start(
        transport: Arc<dyn IngestTransport>,
        ingest: &IngestConfig,
        publish: &PublishConfig,
        credentials: &SessionCredentials,
        feed: broadcast::Sender<Bytes>,
        handlers: Vec<Arc<dyn PublishEventHandler>>,
    ) -> Self {
        let publisher_id = Uuid::new_v4();
        let url = build_ingest_url(ingest, credentials, &publisher_id);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let driver = Driver {
            machine: PublishMachine::new(publish.backoff_policy()),
            transport,
            url,
            feed,
            chunk_interval: publish.chunk_interval,
            keepalive_interval: publish.keepalive_interval,
            watermarks: publish.watermark_policy(),
            handlers,
            state_tx,
        };

        info!(%publisher_id, "publish connection starting");
        let task = tokio::spawn(driver.run(cmd_rx));

        Self {
            publisher_id,
            cmd_tx,
            state_rx,
            task,
        }
    }

    pub fn publisher_id(&self) -> Uuid {
        self.publisher_id
    }

    /// Observation channel for the connection state.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Switch chunk production to another encoded feed without interrupting
    /// the connection. The chunk in production at swap time is flushed and
    /// sent, not dropped.
    pub async fn swap_stream(&self, feed: broadcast::Sender<Bytes>) {
        let _ = self.cmd_tx.send(Command::SwapStream(feed)).await;
    }

    /// End the publish lifetime: flush the final chunk, close the transport
    /// and settle on idle. Idempotent.
    pub async fn stop(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Stop { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }
}

impl Drop for PublishConnection {
    fn drop(&mut self) {
        // Backstop for a handle discarded without stop().
        self.task.abort();
    }
}

/// IO resources currently held by the driver. All optional: which ones exist
/// depends on the machine state.
#[derive(Default)]
struct Link {
    connect_task: Option<JoinHandle<Result<Box<dyn IngestConnection>, TransportError>>>,
    connection: Option<Box<dyn IngestConnection>>,
    closed_rx: Option<watch::Receiver<bool>>,
    chunker: Option<Chunker>,
    chunk_rx: Option<mpsc::Receiver<Chunk>>,
    retry_sleep: Option<Pin<Box<Sleep>>>,
    keepalive: Option<Interval>,
    drain_poll: Option<Interval>,
}

enum Wake {
    Cmd(Option<Command>),
    Connected(Result<Box<dyn IngestConnection>, TransportError>),
    Chunk(Option<Chunk>),
    TransportGone,
    RetryFired,
    KeepaliveTick,
    DrainTick,
}

/// Single-task event loop executing the machine's effects. All connection
/// state lives here; no locks are involved.
struct Driver {
    machine: PublishMachine,
    transport: Arc<dyn IngestTransport>,
    url: String,
    feed: broadcast::Sender<Bytes>,
    chunk_interval: Duration,
    keepalive_interval: Duration,
    watermarks: WatermarkPolicy,
    handlers: Vec<Arc<dyn PublishEventHandler>>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Driver {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        let mut link = Link::default();

        let effects = self.machine.on_event(MachineInput::StartRequested);
        self.apply(effects, &mut link).await;

        loop {
            // Split the link so each select branch borrows only its own slot.
            let Link {
                connect_task,
                closed_rx,
                chunk_rx,
                retry_sleep,
                keepalive,
                drain_poll,
                ..
            } = &mut link;

            let wake = tokio::select! {
                cmd = cmd_rx.recv() => Wake::Cmd(cmd),
                connected = async {
                    match connect_task.as_mut() {
                        Some(task) => match task.await {
                            Ok(result) => result,
                            Err(e) => Err(TransportError::HandshakeFailed {
                                reason: format!("connect task failed: {}", e),
                            }),
                        },
                        None => std::future::pending().await,
                    }
                }, if connect_task.is_some() => {
                    *connect_task = None;
                    Wake::Connected(connected)
                }
                chunk = async {
                    match chunk_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                }, if chunk_rx.is_some() => Wake::Chunk(chunk),
                changed = async {
                    match closed_rx.as_mut() {
                        Some(rx) => rx.changed().await,
                        None => std::future::pending().await,
                    }
                }, if closed_rx.is_some() => {
                    let gone = changed.is_err()
                        || closed_rx.as_ref().map(|rx| *rx.borrow()).unwrap_or(true);
                    if gone {
                        Wake::TransportGone
                    } else {
                        continue;
                    }
                }
                _ = async {
                    match retry_sleep.as_mut() {
                        Some(sleep) => sleep.await,
                        None => std::future::pending().await,
                    }
                }, if retry_sleep.is_some() => Wake::RetryFired,
                _ = async {
                    match keepalive.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending().await,
                    }
                }, if keepalive.is_some() => Wake::KeepaliveTick,
                _ = async {
                    match drain_poll.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending().await,
                    }
                }, if drain_poll.is_some() => Wake::DrainTick,
            };

            match wake {
                Wake::Cmd(Some(Command::Stop { ack })) => {
                    let effects = self.machine.on_event(MachineInput::StopRequested);
                    self.apply(effects, &mut link).await;
                    let _ = ack.send(());
                    break;
                }
                Wake::Cmd(Some(Command::SwapStream(feed))) => {
                    self.feed = feed;
                    if self.machine.state() == ConnectionState::Publishing {
                        self.apply(vec![Effect::StopChunker, Effect::StartChunker], &mut link)
                            .await;
                    }
                }
                Wake::Cmd(None) => {
                    // Handle dropped; behave as a stop request.
                    let effects = self.machine.on_event(MachineInput::StopRequested);
                    self.apply(effects, &mut link).await;
                    break;
                }
                Wake::Connected(Ok(connection)) => {
                    if self.machine.state() == ConnectionState::Connecting {
                        link.closed_rx = Some(connection.closed());
                        link.connection = Some(connection);
                        let effects = self.machine.on_event(MachineInput::HandshakeSucceeded);
                        self.apply(effects, &mut link).await;
                    } else {
                        let mut connection = connection;
                        connection.close().await;
                    }
                }
                Wake::Connected(Err(e)) => {
                    warn!("ingest connect failed: {}", e);
                    let effects = self.machine.on_event(MachineInput::HandshakeFailed);
                    self.apply(effects, &mut link).await;
                }
                Wake::Chunk(Some(chunk)) => {
                    self.deliver_chunk(chunk, &mut link).await;
                }
                Wake::Chunk(None) => {
                    link.chunk_rx = None;
                }
                Wake::TransportGone => {
                    debug!("ingest transport lost");
                    link.connection = None;
                    link.closed_rx = None;
                    let effects = self.machine.on_event(MachineInput::TransportClosed);
                    self.apply(effects, &mut link).await;
                }
                Wake::RetryFired => {
                    link.retry_sleep = None;
                    let effects = self.machine.on_event(MachineInput::RetryTimerFired);
                    self.apply(effects, &mut link).await;
                }
                Wake::KeepaliveTick => {
                    if let Some(connection) = link.connection.as_mut() {
                        if let Err(e) = connection.send_keepalive().await {
                            debug!("keepalive failed: {}", e);
                            link.connection = None;
                            link.closed_rx = None;
                            let effects = self.machine.on_event(MachineInput::TransportClosed);
                            self.apply(effects, &mut link).await;
                        }
                    }
                }
                Wake::DrainTick => {
                    self.poll_drain(&mut link);
                }
            }
        }
    }

    /// Send one chunk, then apply the watermark gate. Chunks arriving while
    /// the machine is not publishing are discarded: at-most-once delivery,
    /// no replay on reconnect.
    async fn deliver_chunk(&mut self, chunk: Chunk, link: &mut Link) {
        if self.machine.state() != ConnectionState::Publishing {
            debug!("discarding {} byte chunk, not publishing", chunk.len());
            return;
        }
        let Some(connection) = link.connection.as_mut() else {
            return;
        };

        let bytes = chunk.len();
        match connection.send_chunk(chunk.data).await {
            Ok(()) => {
                if let Some(keepalive) = link.keepalive.as_mut() {
                    // Chunk traffic is liveness enough.
                    keepalive.reset();
                }
                self.emit(PublishEvent::ChunkSent { bytes });
                let buffered = connection.buffered_bytes();
                if buffered >= self.watermarks.high {
                    if let Some(chunker) = link.chunker.as_ref() {
                        if !chunker.is_paused() {
                            chunker.pause();
                            link.drain_poll =
                                Some(tokio::time::interval(self.watermarks.drain_poll));
                            self.emit(PublishEvent::ProductionPaused { buffered });
                        }
                    }
                }
            }
            Err(e) => {
                warn!("chunk send failed: {}", e);
                link.connection = None;
                link.closed_rx = None;
                let effects = self.machine.on_event(MachineInput::TransportClosed);
                self.apply(effects, link).await;
            }
        }
    }

    fn poll_drain(&mut self, link: &mut Link) {
        let buffered = match link.connection.as_ref() {
            Some(connection) => connection.buffered_bytes(),
            None => {
                link.drain_poll = None;
                return;
            }
        };
        if buffered <= self.watermarks.low {
            if let Some(chunker) = link.chunker.as_ref() {
                if chunker.is_paused() {
                    chunker.resume();
                    self.emit(PublishEvent::ProductionResumed);
                }
            }
            link.drain_poll = None;
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>, link: &mut Link) {
        for effect in effects {
            match effect {
                Effect::OpenTransport => {
                    let transport = self.transport.clone();
                    let url = self.url.clone();
                    link.connect_task =
                        Some(tokio::spawn(
                            async move { transport.connect(&url).await },
                        ));
                }
                Effect::CloseTransport => {
                    if let Some(task) = link.connect_task.take() {
                        task.abort();
                    }
                    if let Some(mut connection) = link.connection.take() {
                        connection.close().await;
                    }
                    link.closed_rx = None;
                }
                Effect::StartChunker => {
                    let (chunker, chunk_rx) = Chunker::start(&self.feed, self.chunk_interval);
                    link.chunker = Some(chunker);
                    link.chunk_rx = Some(chunk_rx);
                    link.drain_poll = None;
                }
                Effect::StopChunker => {
                    if let Some(chunker) = link.chunker.take() {
                        let final_chunk = chunker.stop().await;
                        // The chunk in production when stopping is flushed
                        // and sent, provided the transport is still there.
                        if let Some(connection) = link.connection.as_mut() {
                            let bytes = final_chunk.len();
                            match connection.send_chunk(final_chunk.data).await {
                                Ok(()) => self.emit(PublishEvent::ChunkSent { bytes }),
                                Err(e) => debug!("final chunk not delivered: {}", e),
                            }
                        }
                    }
                    link.chunk_rx = None;
                    link.drain_poll = None;
                }
                Effect::StartKeepalive => {
                    let start = Instant::now() + self.keepalive_interval;
                    link.keepalive =
                        Some(tokio::time::interval_at(start, self.keepalive_interval));
                }
                Effect::CancelKeepalive => {
                    link.keepalive = None;
                }
                Effect::ScheduleRetry(delay) => {
                    link.retry_sleep = Some(Box::pin(tokio::time::sleep(delay)));
                }
                Effect::CancelRetry => {
                    link.retry_sleep = None;
                }
                Effect::Notify(event) => {
                    if let PublishEvent::StateChanged { state } = &event {
                        let _ = self.state_tx.send(*state);
                    }
                    self.emit(event);
                }
            }
        }
    }

    fn emit(&self, event: PublishEvent) {
        for handler in &self.handlers {
            handler.handle_event(event.clone());
        }
    }
}
