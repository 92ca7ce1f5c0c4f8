//! The connection manager task.
//!
//! All lifecycle decisions are made by [`ConnectionMachine`]; the driver in
//! this module only executes the effects it asks for. Because the driver
//! holds at most one channel, one pending attempt, one timer and one
//! heartbeat, and replaces each by assignment, a session can never have two
//! live channels, two timers or two heartbeat loops.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Instant, Sleep};
use tracing::{debug, info, warn};

use parley_shared::constants::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, DEFAULT_HEARTBEAT_SECS, REASON_DISCONNECT,
};
use parley_shared::protocol::ensure_single_line;
use parley_shared::{InboundFrame, UserId};

use crate::backoff::Backoff;
use crate::error::{NetError, Result};
use crate::events::{ConnectionEvent, EventHub};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatTick};
use crate::state::{ConnectionMachine, ConnectionState, Effect};
use crate::transport::{ChannelCommand, ChannelIo, Connector, TransportEvent};

/// Tuning for a [`ConnectionManager`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub backoff: Backoff,
    pub heartbeat_period: Duration,
    /// Drop the channel if nothing at all is received for this long.
    /// `None` disables the check.
    pub liveness_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            heartbeat_period: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            liveness_timeout: None,
        }
    }
}

/// Commands sent *into* the manager task.
#[derive(Debug)]
enum ConnectionCommand {
    Connect {
        user_id: UserId,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect(oneshot::Sender<()>),
    Logout(oneshot::Sender<()>),
    RetryNow(oneshot::Sender<Result<()>>),
    Publish {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Handle to the manager task. Cheap to clone; every clone drives the same
/// session.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    commands: mpsc::UnboundedSender<ConnectionCommand>,
    hub: EventHub,
    state: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Spawn the manager in a background tokio task. It starts `Idle`.
    pub fn spawn(connector: Arc<dyn Connector>, config: ConnectionConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let hub = EventHub::new();

        let driver = Driver {
            machine: ConnectionMachine::new(config.backoff),
            connector,
            config,
            hub: hub.clone(),
            state_tx,
            channel: None,
            pending: None,
            timer: None,
            heartbeat: None,
        };
        tokio::spawn(driver.run(cmd_rx));

        Self {
            commands: cmd_tx,
            hub,
            state: state_rx,
        }
    }

    /// Open a channel scoped to `user_id`, superseding any existing one.
    /// Returns once the attempt has started, not once it has opened.
    pub async fn connect(&self, user_id: UserId) -> Result<()> {
        self.request(|reply| ConnectionCommand::Connect { user_id, reply })
            .await?
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.request(ConnectionCommand::Disconnect).await
    }

    pub async fn logout(&self) -> Result<()> {
        self.request(ConnectionCommand::Logout).await
    }

    pub async fn retry_now(&self) -> Result<()> {
        self.request(ConnectionCommand::RetryNow).await?
    }

    /// Send a text frame on the open channel.
    pub async fn publish(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        ensure_single_line(&text)?;
        self.request(|reply| ConnectionCommand::Publish { text, reply })
            .await?
    }

    /// Receive every event emitted from now on, in order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.hub.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop the manager task, closing any live channel.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ConnectionCommand::Shutdown);
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ConnectionCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| NetError::ManagerClosed)?;
        rx.await.map_err(|_| NetError::ManagerClosed)
    }
}

type PendingConnect = BoxFuture<'static, Result<ChannelIo>>;

struct Driver {
    machine: ConnectionMachine,
    connector: Arc<dyn Connector>,
    config: ConnectionConfig,
    hub: EventHub,
    state_tx: watch::Sender<ConnectionState>,
    channel: Option<ChannelIo>,
    pending: Option<PendingConnect>,
    timer: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<HeartbeatMonitor>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ConnectionCommand>) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(ConnectionCommand::Shutdown) | None => {
                        info!("Connection manager shutting down");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },

                result = poll_pending(&mut self.pending) => {
                    self.pending = None;
                    match result {
                        Ok(io) => {
                            self.channel = Some(io);
                            let effects = self.machine.opened();
                            self.apply(effects);
                        }
                        Err(e) => {
                            let effects = self.machine.failed(e.to_string(), Instant::now());
                            self.apply(effects);
                        }
                    }
                }

                event = recv_channel(&mut self.channel) => self.handle_transport(event),

                _ = wait_timer(&mut self.timer) => {
                    self.timer = None;
                    let effects = self.machine.timer_fired();
                    self.apply(effects);
                }

                tick = next_tick(&mut self.heartbeat) => match tick {
                    HeartbeatTick::Probe => {
                        debug!("Sending liveness probe");
                        self.send_text(HeartbeatMonitor::probe().to_string());
                    }
                    HeartbeatTick::Expired => {
                        let effects = self.machine.liveness_expired(Instant::now());
                        self.apply(effects);
                    }
                },
            }
        }

        if let Some(channel) = self.channel.take() {
            let _ = channel.send(ChannelCommand::Close {
                code: CLOSE_NORMAL,
                reason: REASON_DISCONNECT.to_string(),
            });
        }
    }

    fn handle_command(&mut self, command: ConnectionCommand) {
        match command {
            ConnectionCommand::Connect { user_id, reply } => {
                let result = self.machine.connect(user_id).map(|effects| self.apply(effects));
                let _ = reply.send(result);
            }
            ConnectionCommand::Disconnect(reply) => {
                let effects = self.machine.disconnect();
                self.apply(effects);
                let _ = reply.send(());
            }
            ConnectionCommand::Logout(reply) => {
                let effects = self.machine.logout();
                self.apply(effects);
                let _ = reply.send(());
            }
            ConnectionCommand::RetryNow(reply) => {
                let result = self.machine.retry_now().map(|effects| self.apply(effects));
                let _ = reply.send(result);
            }
            ConnectionCommand::Publish { text, reply } => {
                let result = if self.machine.state().is_open() {
                    if self.send_text(text) {
                        Ok(())
                    } else {
                        Err(NetError::Transport("channel is gone".to_string()))
                    }
                } else {
                    Err(NetError::NotOpen)
                };
                let _ = reply.send(result);
            }
            ConnectionCommand::Shutdown => {}
        }
    }

    fn handle_transport(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Frame(raw)) => {
                if let Some(heartbeat) = self.heartbeat.as_mut() {
                    heartbeat.observe_inbound();
                }
                let frame = InboundFrame::decode(&raw);
                if frame.is_heartbeat() {
                    let reply = self
                        .heartbeat
                        .as_ref()
                        .and_then(|heartbeat| heartbeat.reply_to(&frame));
                    if let Some(reply) = reply {
                        debug!("Answering remote liveness probe");
                        self.send_text(reply);
                    }
                    return;
                }
                self.hub.emit(ConnectionEvent::Frame(raw));
            }
            Some(TransportEvent::Closed { code, reason }) => {
                self.channel = None;
                let effects = self.machine.closed(code, reason, Instant::now());
                self.apply(effects);
            }
            Some(TransportEvent::Error(error)) => {
                self.channel = None;
                let effects = self.machine.failed(error, Instant::now());
                self.apply(effects);
            }
            None => {
                self.channel = None;
                let reason = "transport went away".to_string();
                let effects = self.machine.closed(CLOSE_ABNORMAL, reason, Instant::now());
                self.apply(effects);
            }
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let state = self.machine.state();
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Connection state changed");
        }

        for effect in effects {
            match effect {
                Effect::OpenChannel { user_id } => {
                    let connector = Arc::clone(&self.connector);
                    self.pending = Some(Box::pin(async move { connector.connect(&user_id).await }));
                }
                Effect::CloseChannel { code, reason } => match self.channel.as_ref() {
                    Some(channel) => {
                        if !channel.send(ChannelCommand::Close { code, reason }) {
                            debug!("Channel already gone while closing");
                        }
                    }
                    None => warn!("Close requested without a live channel"),
                },
                Effect::DropChannel { code, reason } => {
                    self.pending = None;
                    if let Some(channel) = self.channel.take() {
                        let _ = channel.send(ChannelCommand::Close { code, reason });
                    }
                }
                Effect::ArmTimer { delay } => self.timer = Some(Box::pin(sleep(delay))),
                Effect::CancelTimer => self.timer = None,
                Effect::StartHeartbeat => {
                    self.heartbeat = Some(HeartbeatMonitor::start(
                        self.config.heartbeat_period,
                        self.config.liveness_timeout,
                    ));
                }
                Effect::StopHeartbeat => self.heartbeat = None,
                Effect::Emit(event) => self.hub.emit(event),
            }
        }
    }

    fn send_text(&self, text: String) -> bool {
        match self.channel.as_ref() {
            Some(channel) => channel.send(ChannelCommand::Text(text)),
            None => false,
        }
    }
}

async fn poll_pending(pending_connect: &mut Option<PendingConnect>) -> Result<ChannelIo> {
    match pending_connect.as_mut() {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn recv_channel(channel: &mut Option<ChannelIo>) -> Option<TransportEvent> {
    match channel.as_mut() {
        Some(io) => io.events.recv().await,
        None => pending().await,
    }
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<HeartbeatMonitor>) -> HeartbeatTick {
    match heartbeat.as_mut() {
        Some(monitor) => monitor.tick().await,
        None => pending().await,
    }
}
