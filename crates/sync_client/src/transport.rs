use std::fmt;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::ConversationId,
    protocol::{ClientFrame, ServerFrame},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::error::TransportError;

/// Reserved channel name for the account-wide notification stream.
const NOTIFICATIONS_CHANNEL: &str = "notifications";

/// Address of one persistent channel: a single conversation, or the
/// notification stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Conversation(ConversationId),
    Notifications,
}

impl Endpoint {
    pub(crate) fn channel_name(&self) -> &str {
        match self {
            Endpoint::Conversation(id) => id.as_str(),
            Endpoint::Notifications => NOTIFICATIONS_CHANNEL,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Conversation(id) => write!(f, "conversation/{id}"),
            Endpoint::Notifications => f.write_str(NOTIFICATIONS_CHANNEL),
        }
    }
}

#[derive(Debug)]
pub enum ChannelSignal {
    Frame(ServerFrame),
    Closed { reason: Option<String> },
}

/// Live connection handed back by a transport: a sender for outbound frames
/// and a receiver for inbound frames and the closure signal.
pub struct Channel {
    pub frames_out: mpsc::UnboundedSender<ClientFrame>,
    pub signals_in: mpsc::UnboundedReceiver<ChannelSignal>,
}

#[async_trait]
pub trait ChannelTransport: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint, token: &str) -> Result<Channel, TransportError>;
}

/// Production transport: one WebSocket per endpoint, authenticated by
/// appending the bearer token to the connect URL.
pub struct WebSocketTransport {
    base_url: Url,
}

impl WebSocketTransport {
    pub fn new(base_url: Url) -> Self {
        Self { base_url }
    }

    fn endpoint_url(&self, endpoint: &Endpoint, token: &str) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        match url.scheme() {
            "ws" | "wss" => {}
            "http" => url
                .set_scheme("ws")
                .map_err(|_| TransportError::InvalidEndpoint(self.base_url.to_string()))?,
            "https" => url
                .set_scheme("wss")
                .map_err(|_| TransportError::InvalidEndpoint(self.base_url.to_string()))?,
            _ => return Err(TransportError::InvalidEndpoint(self.base_url.to_string())),
        }
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| TransportError::InvalidEndpoint(self.base_url.to_string()))?;
            segments.pop_if_empty();
            segments.extend(["ws", "chat", endpoint.channel_name(), ""]);
        }
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }
}

#[async_trait]
impl ChannelTransport for WebSocketTransport {
    async fn connect(&self, endpoint: &Endpoint, token: &str) -> Result<Channel, TransportError> {
        let url = self.endpoint_url(endpoint, token)?;
        let (socket, _response) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        let (mut sink, mut stream) = socket.split();

        let (frames_out, mut frames_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (signals_tx, signals_in) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = frames_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to encode outbound frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            // Sender side dropped: the engine asked for a clean close.
            let _ = sink.send(Message::Close(None)).await;
        });

        tokio::spawn(async move {
            let mut reason = None;
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(&text) {
                        Ok(frame) => {
                            if signals_tx.send(ChannelSignal::Frame(frame)).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            debug!(error = %err, "dropping unparseable frame");
                        }
                    },
                    Ok(Message::Close(close)) => {
                        reason = close.map(|frame| frame.reason.to_string());
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        reason = Some(err.to_string());
                        break;
                    }
                }
            }
            let _ = signals_tx.send(ChannelSignal::Closed { reason });
        });

        Ok(Channel {
            frames_out,
            signals_in,
        })
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
