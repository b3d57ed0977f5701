//! peercache - client side of the posecast channel
//!
//! - `cache`: `PeerStateCache`, latest pose per peer, read by the render loop
//! - `client`: `PoseClient`, WebSocket connection to a relay
//!
//! A client owns one cache. Events from the relay are applied to it between
//! render ticks; nothing here spawns tasks or takes locks.

pub mod cache;
pub mod client;

pub use cache::{CacheStats, PeerEntry, PeerStateCache};
pub use client::{ClientError, ClientOptions, PoseClient, RelayEvent};
pub use poseconf::EvictionPolicy;
