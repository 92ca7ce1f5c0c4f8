//! WebSocket transport built on tokio-tungstenite.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, Sleep};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use parley_shared::constants::CLOSE_ABNORMAL;
use parley_shared::UserId;

use crate::error::{NetError, Result};
use crate::transport::{ChannelCommand, ChannelIo, ChannelPeer, Connector, TransportEvent};

/// How long to wait for the remote to acknowledge our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `endpoint?user_id=<id>`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: Url,
}

impl WsConnector {
    pub fn new(endpoint: &str) -> Result<Self> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
        })
    }

    pub fn url_for(&self, user_id: &UserId) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("user_id", user_id.as_str());
        url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, user_id: &UserId) -> Result<ChannelIo> {
        let url = self.url_for(user_id);
        debug!(url = %url, "Dialing push endpoint");
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| NetError::Transport(e.to_string()))?;
        info!(user = %user_id, "WebSocket handshake complete");

        let (io, peer) = ChannelIo::pair();
        tokio::spawn(pump(ws, peer));
        Ok(io)
    }
}

/// Shuttle frames between the socket and the manager until either side ends.
async fn pump(ws: WsStream, mut peer: ChannelPeer) {
    let (mut write, mut read) = ws.split();
    let mut sent_close: Option<(u16, String)> = None;
    let mut close_deadline: Option<Pin<Box<Sleep>>> = None;

    loop {
        tokio::select! {
            cmd = peer.commands.recv(), if sent_close.is_none() => match cmd {
                Some(ChannelCommand::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        let _ = peer.events.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(ChannelCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    sent_close = Some((code, reason));
                    close_deadline = Some(Box::pin(sleep(CLOSE_GRACE)));
                }
                None => {
                    // The manager let go of this channel.
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            },

            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if peer.events.send(TransportEvent::Frame(text)).await.is_err() {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (u16::from(CloseCode::Status), String::new()),
                    };
                    let _ = peer.events.send(TransportEvent::Closed { code, reason }).await;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read failed");
                    let _ = peer.events.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
                None => {
                    let (code, reason) = sent_close
                        .take()
                        .unwrap_or((CLOSE_ABNORMAL, "stream ended".to_string()));
                    let _ = peer.events.send(TransportEvent::Closed { code, reason }).await;
                    break;
                }
            },

            _ = wait(&mut close_deadline) => {
                let (code, reason) = sent_close.take().unwrap_or((CLOSE_ABNORMAL, String::new()));
                debug!(code, "Close handshake timed out");
                let _ = peer.events.send(TransportEvent::Closed { code, reason }).await;
                break;
            }
        }
    }

    debug!("WebSocket pump finished");
}

async fn wait(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline.as_mut() {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}
