//! WebSocket client for a posecast relay.
//!
//! Connects to the hub, waits for the `welcome` frame that carries this
//! connection's id, then exposes publish and a pull-style event stream.
//! Feeding events into a `PeerStateCache` is left to the caller's loop so a
//! render tick and incoming frames can share one task:
//!
//! ```rust,ignore
//! let mut client = PoseClient::connect(url, ClientOptions::default()).await?;
//! let mut cache = PeerStateCache::default();
//! loop {
//!     tokio::select! {
//!         _ = tick.tick() => render(&cache.snapshot()),
//!         Some(event) = client.next_event() => client.apply(&mut cache, &event?),
//!     }
//! }
//! ```

use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use poseconf::ChannelConfig;
use poseproto::{ClientFrame, ConnectionId, FrameError, PayloadError, PoseCodec, PoseVector, RelayFrame};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::cache::PeerStateCache;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Payload shape; must match the relay's vector length
    pub codec: PoseCodec,
    /// Bound on TCP connect, upgrade, and the welcome frame combined
    pub connect_timeout: Duration,
    /// Whether `apply` stores this client's own echoed poses
    pub track_self: bool,
}

impl ClientOptions {
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            codec: PoseCodec::from(&config.pose),
            connect_timeout: Duration::from_millis(config.client.connect_timeout_ms),
            track_self: config.client.track_self,
        }
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from_config(&ChannelConfig::default())
    }
}

/// Something the relay told us after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Deliver {
        sender: ConnectionId,
        payload: String,
    },
    PeerJoined(ConnectionId),
    PeerLeft(ConnectionId),
    Notice(String),
}

impl RelayEvent {
    /// Convert a post-handshake frame. A repeated `welcome` has no meaning
    /// here and yields `None`.
    fn from_frame(frame: RelayFrame) -> Option<Self> {
        match frame {
            RelayFrame::Welcome { .. } => None,
            RelayFrame::Deliver { sender, payload } => Some(RelayEvent::Deliver { sender, payload }),
            RelayFrame::PeerJoined { id } => Some(RelayEvent::PeerJoined(id)),
            RelayFrame::PeerLeft { id } => Some(RelayEvent::PeerLeft(id)),
            RelayFrame::Notice { message } => Some(RelayEvent::Notice(message)),
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout waiting for {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Relay uses {relay}-component poses, client is configured for {local}")]
    VectorLengthMismatch { local: usize, relay: usize },

    #[error("Relay uses {relay:?} as separator, client is configured for {local:?}")]
    SeparatorMismatch { local: char, relay: char },

    #[error("Connection closed by relay")]
    Closed,

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// A live connection to a relay.
pub struct PoseClient {
    id: ConnectionId,
    options: ClientOptions,
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
}

impl PoseClient {
    /// Connect and complete the welcome handshake.
    pub async fn connect(url: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let limit = options.connect_timeout;
        timeout(limit, Self::handshake(url, options))
            .await
            .map_err(|_| ClientError::Timeout(format!("welcome from {url}")))?
    }

    async fn handshake(url: &str, options: ClientOptions) -> Result<Self, ClientError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let (sink, mut stream) = ws.split();

        let (id, relay_len, relay_sep) = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match RelayFrame::decode(text.as_str())? {
                    RelayFrame::Welcome {
                        id,
                        vector_len,
                        separator,
                    } => break (id, vector_len, separator),
                    other => {
                        return Err(ClientError::Protocol(format!(
                            "expected welcome, got {}",
                            other.kind()
                        )))
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Closed),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ClientError::Transport(e.to_string())),
            }
        };

        let local = options.codec.vector_len();
        if relay_len != local {
            return Err(ClientError::VectorLengthMismatch {
                local,
                relay: relay_len,
            });
        }

        let local = options.codec.separator();
        if relay_sep != local {
            return Err(ClientError::SeparatorMismatch {
                local,
                relay: relay_sep,
            });
        }

        info!(id = %id.short(), %url, "connected to relay");
        Ok(Self {
            id,
            options,
            sink,
            stream,
        })
    }

    /// Id the relay assigned to this connection.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Encode and publish a pose.
    pub async fn publish(&mut self, pose: &PoseVector) -> Result<(), ClientError> {
        let payload = self.options.codec.encode(pose)?;
        self.publish_raw(payload).await
    }

    /// Publish a payload string exactly as given. The relay does not check
    /// it; receivers drop it if it doesn't decode.
    pub async fn publish_raw(&mut self, payload: impl Into<String>) -> Result<(), ClientError> {
        let text = ClientFrame::publish(payload).encode()?;
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }

    /// Wait for the next event. `None` once the relay has closed the
    /// connection. Undecodable frames are logged and skipped.
    pub async fn next_event(&mut self) -> Option<Result<RelayEvent, ClientError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => match RelayFrame::decode(text.as_str()) {
                    Ok(frame) => match RelayEvent::from_frame(frame) {
                        Some(event) => return Some(Ok(event)),
                        None => debug!("ignoring repeated welcome"),
                    },
                    Err(e) => warn!(error = %e, "skipping undecodable relay frame"),
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(ClientError::Transport(e.to_string()))),
            }
        }
    }

    /// Apply an event to a cache.
    ///
    /// Deliveries update the sender's entry (skipping our own echoes when
    /// `track_self` is off); departures go through the cache's eviction
    /// policy. Presence joins and notices don't touch the cache.
    pub fn apply(&self, cache: &mut PeerStateCache, event: &RelayEvent) {
        match event {
            RelayEvent::Deliver { sender, payload } => {
                if *sender == self.id && !self.options.track_self {
                    return;
                }
                cache.on_deliver(*sender, payload);
            }
            RelayEvent::PeerLeft(id) => {
                cache.on_peer_left(id);
            }
            RelayEvent::PeerJoined(id) => debug!(peer = %id.short(), "peer joined"),
            RelayEvent::Notice(message) => warn!(%message, "relay notice"),
        }
    }

    /// Send a close frame and drop the connection.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.sink
            .close()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}
