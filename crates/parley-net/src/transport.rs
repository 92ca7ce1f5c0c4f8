//! Transport abstraction for the push channel.
//!
//! A [`Connector`] performs the handshake and hands back a [`ChannelIo`]:
//! the manager's half of a pair of queues whose other half is driven by a
//! transport-specific pump task. Dropping the `ChannelIo` tells the pump to
//! close the socket and exit.

use async_trait::async_trait;
use tokio::sync::mpsc;

use parley_shared::UserId;

use crate::error::Result;

/// Depth of the inbound event queue between a pump and the manager.
pub const CHANNEL_EVENT_CAPACITY: usize = 256;

/// Instructions for the pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
    Text(String),
    Close { code: u16, reason: String },
}

/// What the pump observed on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed { code: u16, reason: String },
    Error(String),
}

/// The manager's side of one channel instance.
#[derive(Debug)]
pub struct ChannelIo {
    pub outbound: mpsc::UnboundedSender<ChannelCommand>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// The transport's side of one channel instance.
#[derive(Debug)]
pub struct ChannelPeer {
    pub commands: mpsc::UnboundedReceiver<ChannelCommand>,
    pub events: mpsc::Sender<TransportEvent>,
}

impl ChannelIo {
    pub fn pair() -> (ChannelIo, ChannelPeer) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_EVENT_CAPACITY);
        (
            ChannelIo {
                outbound: cmd_tx,
                events: event_rx,
            },
            ChannelPeer {
                commands: cmd_rx,
                events: event_tx,
            },
        )
    }

    /// Queue a command for the pump. Returns `false` if the pump is gone.
    pub fn send(&self, command: ChannelCommand) -> bool {
        self.outbound.send(command).is_ok()
    }
}

/// Opens channels to the push-delivery endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Perform the handshake for a channel scoped to `user_id`. Returning
    /// `Ok` means the transport is open.
    async fn connect(&self, user_id: &UserId) -> Result<ChannelIo>;
}
