//! Per-peer pose cache.
//!
//! Turns the unordered stream of `deliver` frames into a mapping the render
//! loop can read once per tick. The cache has a single owner: mutation takes
//! `&mut self`, reads take `&self`, so a delivery and a read can only
//! interleave between whole calls and no lock is involved.
//!
//! Policy:
//! - last write wins, no timestamp comparison (a reordered stale frame will
//!   overwrite a newer one until the next update arrives)
//! - malformed payloads are dropped and the previous entry is kept
//! - departure handling follows the configured `EvictionPolicy`

use std::collections::HashMap;
use std::time::{Duration, Instant};

use poseconf::{ChannelConfig, EvictionPolicy};
use poseproto::{ConnectionId, PoseCodec, PoseVector};
use tracing::{debug, trace};

/// Latest accepted pose for one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerEntry {
    pub pose: PoseVector,
    /// When the current pose was stored
    pub updated_at: Instant,
    /// Number of accepted updates from this peer
    pub updates: u64,
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub applied: u64,
    pub dropped: u64,
    pub evicted: u64,
}

/// Client-local mapping from peer id to that peer's most recent pose.
#[derive(Debug, Clone)]
pub struct PeerStateCache {
    codec: PoseCodec,
    eviction: EvictionPolicy,
    entries: HashMap<ConnectionId, PeerEntry>,
    stats: CacheStats,
}

impl PeerStateCache {
    pub fn new(codec: PoseCodec, eviction: EvictionPolicy) -> Self {
        Self {
            codec,
            eviction,
            entries: HashMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(PoseCodec::from(&config.pose), config.cache.eviction)
    }

    pub fn codec(&self) -> &PoseCodec {
        &self.codec
    }

    pub fn eviction(&self) -> EvictionPolicy {
        self.eviction
    }

    /// Handle one delivered payload.
    ///
    /// On a good payload the sender's entry is overwritten. On a bad one the
    /// frame is dropped and whatever was stored before stays put.
    pub fn on_deliver(&mut self, sender: ConnectionId, payload: &str) {
        match self.codec.decode(payload) {
            Ok(pose) => {
                trace!(peer = %sender.short(), %pose, "pose applied");
                let now = Instant::now();
                self.entries
                    .entry(sender)
                    .and_modify(|entry| {
                        entry.pose = pose.clone();
                        entry.updated_at = now;
                        entry.updates += 1;
                    })
                    .or_insert_with(|| PeerEntry {
                        pose,
                        updated_at: now,
                        updates: 1,
                    });
                self.stats.applied += 1;
            }
            Err(e) => {
                debug!(peer = %sender.short(), error = %e, payload, "dropping malformed pose");
                self.stats.dropped += 1;
            }
        }
    }

    /// Latest pose for `id`, or `None` if nothing was ever received from it.
    pub fn get(&self, id: &ConnectionId) -> Option<&PoseVector> {
        self.entries.get(id).map(|entry| &entry.pose)
    }

    pub fn entry(&self, id: &ConnectionId) -> Option<&PeerEntry> {
        self.entries.get(id)
    }

    /// Owned point-in-time copy of every peer's pose.
    pub fn snapshot(&self) -> HashMap<ConnectionId, PoseVector> {
        self.entries
            .iter()
            .map(|(id, entry)| (*id, entry.pose.clone()))
            .collect()
    }

    /// A peer disconnected. Returns true if its entry was evicted.
    pub fn on_peer_left(&mut self, id: &ConnectionId) -> bool {
        match self.eviction {
            EvictionPolicy::Retain => false,
            EvictionPolicy::EvictOnDisconnect => {
                let evicted = self.entries.remove(id).is_some();
                if evicted {
                    debug!(peer = %id.short(), "evicted departed peer");
                    self.stats.evicted += 1;
                }
                evicted
            }
        }
    }

    /// Forget a peer regardless of policy.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<PoseVector> {
        self.entries.remove(id).map(|entry| entry.pose)
    }

    /// Drop entries that have not been updated within `max_idle`.
    /// Returns the number removed.
    pub fn prune_idle(&mut self, max_idle: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.updated_at.elapsed() <= max_idle);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "pruned idle peers");
            self.stats.evicted += removed as u64;
        }
        removed
    }

    pub fn peers(&self) -> impl Iterator<Item = &ConnectionId> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

impl Default for PeerStateCache {
    fn default() -> Self {
        Self::new(PoseCodec::default(), EvictionPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pose(c: &[f64]) -> PoseVector {
        PoseVector::new(c.to_vec())
    }

    #[test]
    fn test_absent_by_default() {
        let cache = PeerStateCache::default();
        assert_eq!(cache.get(&ConnectionId::new()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_last_successful_write_wins() {
        let mut cache = PeerStateCache::default();
        let a = ConnectionId::new();

        cache.on_deliver(a, "0,0,0");
        cache.on_deliver(a, "5,5,5");
        cache.on_deliver(a, "garbage");
        cache.on_deliver(a, "1,2");

        assert_eq!(cache.get(&a), Some(&pose(&[5.0, 5.0, 5.0])));
        assert_eq!(cache.entry(&a).unwrap().updates, 2);
        assert_eq!(
            cache.stats(),
            CacheStats {
                applied: 2,
                dropped: 2,
                evicted: 0
            }
        );
    }

    #[test]
    fn test_overwrite_over_many_sequences() {
        let payloads = ["1,1,1", "x", "2,2,2", "", "3,3", "4,4,4", "5,5,5,5"];
        for len in 0..=payloads.len() {
            let mut cache = PeerStateCache::default();
            let a = ConnectionId::new();
            let codec = PoseCodec::default();

            for p in &payloads[..len] {
                cache.on_deliver(a, p);
            }

            let expected = payloads[..len]
                .iter()
                .rev()
                .find_map(|p| codec.decode(p).ok());
            assert_eq!(cache.get(&a), expected.as_ref(), "prefix of {len}");
        }
    }

    #[test]
    fn test_peers_are_isolated() {
        let mut cache = PeerStateCache::default();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        cache.on_deliver(b, "9,9,9");
        cache.on_deliver(a, "1,2,3");
        cache.on_deliver(a, "4,5,6");
        cache.on_deliver(a, "bad");

        assert_eq!(cache.get(&b), Some(&pose(&[9.0, 9.0, 9.0])));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_malformed_first_message_leaves_peer_absent() {
        let mut cache = PeerStateCache::default();
        let a = ConnectionId::new();
        cache.on_deliver(a, "1,2");
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.stats().dropped, 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut cache = PeerStateCache::default();
        let a = ConnectionId::new();
        cache.on_deliver(a, "1,2,3");

        let snap = cache.snapshot();
        cache.on_deliver(a, "7,7,7");

        assert_eq!(snap.get(&a), Some(&pose(&[1.0, 2.0, 3.0])));
        assert_eq!(cache.get(&a), Some(&pose(&[7.0, 7.0, 7.0])));
    }

    #[test]
    fn test_retain_keeps_ghost() {
        let mut cache = PeerStateCache::new(PoseCodec::default(), EvictionPolicy::Retain);
        let a = ConnectionId::new();
        cache.on_deliver(a, "1,2,3");

        assert!(!cache.on_peer_left(&a));
        assert_eq!(cache.get(&a), Some(&pose(&[1.0, 2.0, 3.0])));
    }

    #[test]
    fn test_evict_on_disconnect() {
        let mut cache =
            PeerStateCache::new(PoseCodec::default(), EvictionPolicy::EvictOnDisconnect);
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        cache.on_deliver(a, "1,2,3");
        cache.on_deliver(b, "4,5,6");

        assert!(cache.on_peer_left(&a));
        assert!(!cache.on_peer_left(&a));
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b), Some(&pose(&[4.0, 5.0, 6.0])));
        assert_eq!(cache.stats().evicted, 1);
    }

    #[test]
    fn test_prune_idle() {
        let mut cache = PeerStateCache::default();
        let a = ConnectionId::new();
        cache.on_deliver(a, "1,2,3");

        assert_eq!(cache.prune_idle(Duration::from_secs(60)), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.prune_idle(Duration::from_millis(1)), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_from_config_uses_pose_shape() {
        let mut config = ChannelConfig::default();
        config.pose.vector_len = 7;
        config.pose.separator = ';';
        config.cache.eviction = EvictionPolicy::EvictOnDisconnect;

        let mut cache = PeerStateCache::from_config(&config);
        let a = ConnectionId::new();
        cache.on_deliver(a, "1,2,3");
        assert_eq!(cache.get(&a), None);
        cache.on_deliver(a, "0;0;0;0;0;0;1");
        assert_eq!(cache.get(&a).map(|p| p.len()), Some(7));
        assert_eq!(cache.eviction(), EvictionPolicy::EvictOnDisconnect);
    }
}
