use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

/// Events delivered to channel subscribers, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Closed { code: u16, reason: String },
    Error(String),
    /// A non-heartbeat frame, undecoded.
    Frame(String),
}

/// Fan-out of connection events.
///
/// Every subscriber gets its own unbounded queue so a slow consumer never
/// causes frames to be dropped for it or for anybody else.
#[derive(Debug, Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    /// Deliver an event to every live subscriber, forgetting closed ones.
    pub fn emit(&self, event: ConnectionEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
