//! In-memory transport for tests.
//!
//! [`MemoryConnector`] hands every successful connect to a [`MemoryServer`],
//! which exposes the remote end of the channel as a [`MemoryPeer`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use parley_shared::UserId;

use crate::error::{NetError, Result};
use crate::transport::{ChannelCommand, ChannelIo, Connector, TransportEvent};

#[derive(Debug, Default)]
struct Script {
    failures: VecDeque<String>,
    attempts: Vec<(UserId, Instant)>,
}

#[derive(Debug)]
pub struct MemoryConnector {
    script: Mutex<Script>,
    stall: AtomicBool,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

/// Receives the remote ends of channels opened through a [`MemoryConnector`].
#[derive(Debug)]
pub struct MemoryServer {
    peers: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// The remote end of one in-memory channel.
#[derive(Debug)]
pub struct MemoryPeer {
    pub user_id: UserId,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    events: mpsc::Sender<TransportEvent>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, MemoryServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                script: Mutex::new(Script::default()),
                stall: AtomicBool::new(false),
                peers: tx,
            }),
            MemoryServer { peers: rx },
        )
    }

    /// Make the next `count` connect attempts fail.
    pub fn fail_next(&self, count: usize) {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        for _ in 0..count {
            script.failures.push_back("connection refused".to_string());
        }
    }

    /// While set, connect attempts never complete.
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::SeqCst);
    }

    /// Every connect attempt so far, with the time it started.
    pub fn attempts(&self) -> Vec<(UserId, Instant)> {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .attempts
            .clone()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, user_id: &UserId) -> Result<ChannelIo> {
        let failure = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.attempts.push((user_id.clone(), Instant::now()));
            script.failures.pop_front()
        };
        if self.stall.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if let Some(reason) = failure {
            return Err(NetError::Transport(reason));
        }

        let (io, peer) = ChannelIo::pair();
        let _ = self.peers.send(MemoryPeer {
            user_id: user_id.clone(),
            commands: peer.commands,
            events: peer.events,
        });
        Ok(io)
    }
}

impl MemoryServer {
    /// Wait for the next channel to open.
    pub async fn accept(&mut self) -> MemoryPeer {
        match self.peers.recv().await {
            Some(peer) => peer,
            None => std::future::pending().await,
        }
    }

    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.peers.try_recv().ok()
    }
}

impl MemoryPeer {
    /// Deliver a text frame to the client.
    pub async fn send_frame(&self, text: &str) {
        let _ = self
            .events
            .send(TransportEvent::Frame(text.to_string()))
            .await;
    }

    pub async fn close(&self, code: u16, reason: &str) {
        let _ = self
            .events
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
    }

    pub async fn fail(&self, error: &str) {
        let _ = self
            .events
            .send(TransportEvent::Error(error.to_string()))
            .await;
    }

    /// Next command sent by the client, or `None` once it let go of the channel.
    pub async fn next_command(&mut self) -> Option<ChannelCommand> {
        self.commands.recv().await
    }

    /// Next text frame sent by the client, skipping nothing.
    pub async fn next_text(&mut self) -> Option<String> {
        match self.commands.recv().await {
            Some(ChannelCommand::Text(text)) => Some(text),
            _ => None,
        }
    }

    /// Whether the client has closed or dropped this channel. Drains any
    /// queued commands.
    pub fn is_released(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(ChannelCommand::Close { .. }) => return true,
                Ok(ChannelCommand::Text(_)) => continue,
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }
}
