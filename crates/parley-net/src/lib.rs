//! Push channel plumbing for the Parley synchronization core.
//!
//! The [`ConnectionManager`] runs in a dedicated tokio task and owns the only
//! channel of a session. Callers talk to it through a typed command channel
//! and observe it through [`ConnectionEvent`] subscriptions and a
//! [`ConnectionState`] watch, keeping the transport fully decoupled from the
//! code that consumes its frames.

pub mod backoff;
pub mod events;
pub mod heartbeat;
pub mod manager;
pub mod state;
pub mod transport;
pub mod websocket;

#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;

mod error;

pub use backoff::Backoff;
pub use error::NetError;
pub use events::{ConnectionEvent, EventHub};
pub use heartbeat::{HeartbeatMonitor, HeartbeatTick};
pub use manager::{ConnectionConfig, ConnectionManager};
pub use state::{ConnectionMachine, ConnectionState, Connectivity, Effect};
pub use transport::{ChannelCommand, ChannelIo, ChannelPeer, Connector, TransportEvent};
pub use websocket::WsConnector;
