//! Broadcast relay.
//!
//! Holds the live connection set and fans each published payload out to
//! every member. Each connection gets its own bounded outbound queue; offers
//! are `try_send`, so a publisher never waits and a stuck subscriber only
//! loses its own frames.
//!
//! Spans:
//! - `posecast.relay.connect` - connection registered
//! - `posecast.relay.disconnect` - connection removed
//!
//! Frames are encoded once per publish and shared between queues as
//! refcounted `Utf8Bytes`, which the writer hands to the socket as is. Payloads are passed through untouched; the relay never
//! decodes them.

use axum::extract::ws::Utf8Bytes;
use dashmap::DashMap;
use poseconf::{ChannelConfig, RelayConfig};
use poseproto::{ConnectionId, FrameError, PoseCodec, RelayFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

/// Pre-encoded frame text as queued for a connection's writer.
pub type OutboundFrame = Utf8Bytes;

/// Receiving half of a connection's outbound queue.
pub type Subscription = mpsc::Receiver<OutboundFrame>;

#[derive(Debug)]
struct Subscriber {
    tx: mpsc::Sender<OutboundFrame>,
    connected_at: Instant,
}

/// Result of offering one frame to the live set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    /// Connections the frame was offered to
    pub offered: usize,
    /// Offers that landed in a queue
    pub queued: usize,
    /// Offers lost to a full or closed queue
    pub dropped: usize,
}

/// Relay counters, reported by the health endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub live_connections: usize,
    pub connections_accepted: u64,
    pub publishes: u64,
    pub frames_queued: u64,
    pub frames_dropped: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    publishes: AtomicU64,
    queued: AtomicU64,
    dropped: AtomicU64,
}

/// The live connection set for one broadcast channel.
#[derive(Debug)]
pub struct Relay {
    subscribers: DashMap<ConnectionId, Subscriber>,
    config: RelayConfig,
    codec: PoseCodec,
    counters: Counters,
}

impl Relay {
    /// `codec` is only used to advertise the pose shape in `welcome`;
    /// payloads are never decoded.
    pub fn new(config: RelayConfig, codec: PoseCodec) -> Self {
        Self {
            subscribers: DashMap::new(),
            config,
            codec,
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.relay.clone(), PoseCodec::from(&config.pose))
    }

    /// Create a relay wrapped in Arc for sharing with handlers.
    pub fn new_shared(config: &ChannelConfig) -> Arc<Self> {
        Arc::new(Self::from_config(config))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn vector_len(&self) -> usize {
        self.codec.vector_len()
    }

    pub fn separator(&self) -> char {
        self.codec.separator()
    }

    /// Register a new live connection.
    ///
    /// The returned queue already holds the connection's `welcome` frame, so
    /// it is always the first thing the writer sends.
    pub fn connect(&self) -> (ConnectionId, Subscription) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.config.queue_depth.max(1));

        let _span = tracing::info_span!("posecast.relay.connect", peer = %id.short()).entered();

        let welcome = RelayFrame::Welcome {
            id,
            vector_len: self.codec.vector_len(),
            separator: self.codec.separator(),
        };
        // Fresh queue with capacity >= 1, so this can't be full
        if let Some(text) = encode(&welcome) {
            if tx.try_send(text).is_ok() {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                connected_at: Instant::now(),
            },
        );
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        info!(live = self.subscribers.len(), "connection registered");

        if self.config.announce_presence {
            if let Some(text) = encode(&RelayFrame::PeerJoined { id }) {
                self.broadcast(&text, Some(id));
            }
        }

        (id, rx)
    }

    /// Offer `deliver(sender, payload)` to every live connection.
    ///
    /// Per-subscriber failures are counted in the returned `FanOut`, never
    /// returned as errors. The only error is a sender that isn't live.
    pub fn publish(&self, sender: ConnectionId, payload: String) -> Result<FanOut, RelayError> {
        if !self.subscribers.contains_key(&sender) {
            return Err(RelayError::UnknownConnection(sender));
        }

        let text: OutboundFrame = RelayFrame::Deliver { sender, payload }.encode()?.into();
        self.counters.publishes.fetch_add(1, Ordering::Relaxed);

        let skip = if self.config.echo_to_sender {
            None
        } else {
            Some(sender)
        };
        let fan_out = self.broadcast(&text, skip);

        debug!(
            peer = %sender.short(),
            offered = fan_out.offered,
            dropped = fan_out.dropped,
            "published"
        );
        Ok(fan_out)
    }

    /// Queue a `notice` for a single connection. Returns false if it
    /// couldn't be queued.
    pub fn notice(&self, id: ConnectionId, message: impl Into<String>) -> bool {
        let Some(text) = encode(&RelayFrame::Notice {
            message: message.into(),
        }) else {
            return false;
        };
        match self.subscribers.get(&id) {
            Some(subscriber) => self.offer(&id, &subscriber, text),
            None => false,
        }
    }

    /// Remove a connection from the live set. Returns false if it was
    /// already gone.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let _span = tracing::info_span!("posecast.relay.disconnect", peer = %id.short()).entered();

        let Some((_, subscriber)) = self.subscribers.remove(&id) else {
            return false;
        };
        info!(
            connected_secs = subscriber.connected_at.elapsed().as_secs(),
            live = self.subscribers.len(),
            "connection removed"
        );
        drop(subscriber);

        if self.config.announce_presence {
            if let Some(text) = encode(&RelayFrame::PeerLeft { id }) {
                self.broadcast(&text, None);
            }
        }
        true
    }

    pub fn is_live(&self, id: &ConnectionId) -> bool {
        self.subscribers.contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            live_connections: self.subscribers.len(),
            connections_accepted: self.counters.accepted.load(Ordering::Relaxed),
            publishes: self.counters.publishes.load(Ordering::Relaxed),
            frames_queued: self.counters.queued.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    fn broadcast(&self, text: &OutboundFrame, skip: Option<ConnectionId>) -> FanOut {
        let mut fan_out = FanOut::default();
        for entry in self.subscribers.iter() {
            if Some(*entry.key()) == skip {
                continue;
            }
            fan_out.offered += 1;
            if self.offer(entry.key(), entry.value(), text.clone()) {
                fan_out.queued += 1;
            } else {
                fan_out.dropped += 1;
            }
        }
        fan_out
    }

    fn offer(&self, id: &ConnectionId, subscriber: &Subscriber, text: OutboundFrame) -> bool {
        match subscriber.tx.try_send(text) {
            Ok(()) => {
                self.counters.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(peer = %id.short(), "outbound queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(peer = %id.short(), "outbound queue closed, dropping frame");
                false
            }
        }
    }
}

fn encode(frame: &RelayFrame) -> Option<OutboundFrame> {
    match frame.encode() {
        Ok(text) => Some(text.into()),
        Err(e) => {
            warn!(kind = frame.kind(), error = %e, "failed to encode relay frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn relay_with(f: impl FnOnce(&mut RelayConfig)) -> Relay {
        let mut config = RelayConfig::default();
        f(&mut config);
        Relay::new(config, PoseCodec::default())
    }

    fn drain(rx: &mut Subscription) -> Vec<RelayFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = rx.try_recv() {
            frames.push(RelayFrame::decode(text.as_str()).unwrap());
        }
        frames
    }

    #[test]
    fn test_welcome_is_first() {
        let relay = relay_with(|_| {});
        let (id, mut rx) = relay.connect();
        assert_eq!(
            drain(&mut rx),
            vec![RelayFrame::Welcome {
                id,
                vector_len: 3,
                separator: ','
            }]
        );
        assert_eq!(relay.live_count(), 1);
    }

    #[test]
    fn test_publish_reaches_everyone_including_sender() {
        let relay = relay_with(|_| {});
        let (a, mut rx_a) = relay.connect();
        let (_b, mut rx_b) = relay.connect();
        let (_c, mut rx_c) = relay.connect();
        for rx in [&mut rx_a, &mut rx_b, &mut rx_c] {
            drain(rx);
        }

        let fan_out = relay.publish(a, "1,2,3".to_string()).unwrap();
        assert_eq!(
            fan_out,
            FanOut {
                offered: 3,
                queued: 3,
                dropped: 0
            }
        );

        let expected = vec![RelayFrame::Deliver {
            sender: a,
            payload: "1,2,3".to_string(),
        }];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
        assert_eq!(drain(&mut rx_c), expected);
    }

    #[test]
    fn test_no_echo_when_disabled() {
        let relay = relay_with(|c| c.echo_to_sender = false);
        let (a, mut rx_a) = relay.connect();
        let (_b, mut rx_b) = relay.connect();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let fan_out = relay.publish(a, "1,2,3".to_string()).unwrap();
        assert_eq!(fan_out.offered, 1);
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[test]
    fn test_payload_is_opaque() {
        let relay = relay_with(|_| {});
        let (a, mut rx_a) = relay.connect();
        drain(&mut rx_a);

        relay.publish(a, "not, a, pose, at all".to_string()).unwrap();
        assert_eq!(
            drain(&mut rx_a),
            vec![RelayFrame::Deliver {
                sender: a,
                payload: "not, a, pose, at all".to_string()
            }]
        );
    }

    #[test]
    fn test_unknown_sender() {
        let relay = relay_with(|_| {});
        let stranger = ConnectionId::new();
        assert!(matches!(
            relay.publish(stranger, "1,2,3".to_string()),
            Err(RelayError::UnknownConnection(id)) if id == stranger
        ));

        let (a, _rx) = relay.connect();
        relay.disconnect(a);
        assert!(relay.publish(a, "1,2,3".to_string()).is_err());
    }

    #[test]
    fn test_slow_subscriber_only_loses_its_own_frames() {
        let relay = relay_with(|c| c.queue_depth = 2);
        let (a, mut rx_a) = relay.connect();
        // Never drained: welcome plus one deliver fills it
        let (_slow, _rx_slow) = relay.connect();
        drain(&mut rx_a);

        let mut total_dropped = 0;
        for i in 0..5 {
            let fan_out = relay.publish(a, format!("{i},0,0")).unwrap();
            total_dropped += fan_out.dropped;
            drain(&mut rx_a);
        }

        assert_eq!(total_dropped, 4);
        assert_eq!(relay.stats().frames_dropped, 4);
        assert_eq!(relay.stats().publishes, 5);
    }

    #[test]
    fn test_publish_shares_one_encoding() {
        let relay = relay_with(|_| {});
        let (a, mut rx_a) = relay.connect();
        let (_b, mut rx_b) = relay.connect();
        drain(&mut rx_a);
        drain(&mut rx_b);

        relay.publish(a, "1,2,3".to_string()).unwrap();
        let seen_a = rx_a.try_recv().unwrap();
        let seen_b = rx_b.try_recv().unwrap();
        assert_eq!(seen_a.as_str(), seen_b.as_str());
        assert!(std::ptr::eq(seen_a.as_str(), seen_b.as_str()));
    }

    #[test]
    fn test_closed_queue_counts_as_drop() {
        let relay = relay_with(|_| {});
        let (a, mut rx_a) = relay.connect();
        let (_gone, rx_gone) = relay.connect();
        drop(rx_gone);
        drain(&mut rx_a);

        let fan_out = relay.publish(a, "1,2,3".to_string()).unwrap();
        assert_eq!(
            fan_out,
            FanOut {
                offered: 2,
                queued: 1,
                dropped: 1
            }
        );
    }

    #[test]
    fn test_presence_frames() {
        let relay = relay_with(|c| c.announce_presence = true);
        let (_a, mut rx_a) = relay.connect();
        drain(&mut rx_a);

        let (b, mut rx_b) = relay.connect();
        assert_eq!(drain(&mut rx_a), vec![RelayFrame::PeerJoined { id: b }]);
        // The newcomer sees only its welcome
        assert_eq!(
            drain(&mut rx_b),
            vec![RelayFrame::Welcome {
                id: b,
                vector_len: 3,
                separator: ','
            }]
        );

        assert!(relay.disconnect(b));
        assert!(!relay.disconnect(b));
        assert_eq!(drain(&mut rx_a), vec![RelayFrame::PeerLeft { id: b }]);
    }

    #[test]
    fn test_silent_presence_by_default() {
        let relay = relay_with(|_| {});
        let (_a, mut rx_a) = relay.connect();
        drain(&mut rx_a);
        let (b, _rx_b) = relay.connect();
        relay.disconnect(b);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_notice_goes_to_one_connection() {
        let relay = relay_with(|_| {});
        let (a, mut rx_a) = relay.connect();
        let (_b, mut rx_b) = relay.connect();
        drain(&mut rx_a);
        drain(&mut rx_b);

        assert!(relay.notice(a, "bad frame"));
        assert_eq!(
            drain(&mut rx_a),
            vec![RelayFrame::Notice {
                message: "bad frame".to_string()
            }]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert!(!relay.notice(ConnectionId::new(), "nobody"));
    }

    #[test]
    fn test_stats() {
        let relay = relay_with(|_| {});
        let (a, _rx_a) = relay.connect();
        let (b, _rx_b) = relay.connect();
        relay.publish(a, "1,2,3".to_string()).unwrap();
        relay.disconnect(b);

        assert_eq!(
            relay.stats(),
            RelayStats {
                live_connections: 1,
                connections_accepted: 2,
                publishes: 1,
                // two welcomes and two delivers
                frames_queued: 4,
                frames_dropped: 0,
            }
        );
    }
}
