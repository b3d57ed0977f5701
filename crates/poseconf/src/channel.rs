//! Broadcast channel configuration - pose shape, relay fan-out, client cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// Shape of the pose vector carried on the channel.
///
/// Relay and every client of one deployment must agree on this section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    /// Number of numeric components per pose.
    /// Default: 3 (x, y, z position)
    #[serde(default = "PoseConfig::default_vector_len")]
    pub vector_len: usize,

    /// Character joining components in the text payload.
    /// Default: ','
    #[serde(default = "PoseConfig::default_separator")]
    pub separator: char,
}

impl PoseConfig {
    fn default_vector_len() -> usize {
        3
    }

    fn default_separator() -> char {
        ','
    }

    /// A separator may not appear inside a formatted number.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector_len == 0 {
            return Err(ConfigError::Invalid {
                key: "pose.vector_len".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let sep = self.separator;
        if sep.is_alphanumeric() || sep.is_whitespace() || matches!(sep, '.' | '-' | '+') {
            return Err(ConfigError::Invalid {
                key: "pose.separator".to_string(),
                message: format!("{sep:?} can appear inside a number"),
            });
        }

        // Must round-trip through `to_toml`'s unescaped basic string
        if matches!(sep, '"' | '\\') || sep.is_control() {
            return Err(ConfigError::Invalid {
                key: "pose.separator".to_string(),
                message: format!("{sep:?} can't be written to a config file"),
            });
        }

        Ok(())
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            vector_len: Self::default_vector_len(),
            separator: Self::default_separator(),
        }
    }
}

/// Relay fan-out behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Outbound frames buffered per subscriber before new frames are dropped.
    /// Default: 64
    #[serde(default = "RelayConfig::default_queue_depth")]
    pub queue_depth: usize,

    /// Whether a publisher receives its own deliver frame.
    /// Default: true
    #[serde(default = "RelayConfig::default_echo_to_sender")]
    pub echo_to_sender: bool,

    /// Emit peer_joined / peer_left frames on connect and disconnect.
    /// Default: false
    #[serde(default)]
    pub announce_presence: bool,

    /// Largest inbound WebSocket message accepted from a client.
    /// Default: 4096
    #[serde(default = "RelayConfig::default_max_message_bytes")]
    pub max_message_bytes: usize,
}

impl RelayConfig {
    fn default_queue_depth() -> usize {
        64
    }

    fn default_echo_to_sender() -> bool {
        true
    }

    fn default_max_message_bytes() -> usize {
        4096
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            queue_depth: Self::default_queue_depth(),
            echo_to_sender: Self::default_echo_to_sender(),
            announce_presence: false,
            max_message_bytes: Self::default_max_message_bytes(),
        }
    }
}

/// What a client cache does with a peer's entry once that peer disconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Keep the last known pose; the peer's placeholder stays frozen in place.
    #[default]
    Retain,
    /// Remove the entry, so lookups report the peer as absent again.
    EvictOnDisconnect,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Retain => "retain",
            EvictionPolicy::EvictOnDisconnect => "evict_on_disconnect",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retain" => Ok(EvictionPolicy::Retain),
            "evict_on_disconnect" | "evict" => Ok(EvictionPolicy::EvictOnDisconnect),
            other => Err(ConfigError::Invalid {
                key: "cache.eviction".to_string(),
                message: format!("expected \"retain\" or \"evict_on_disconnect\", got {other:?}"),
            }),
        }
    }
}

/// Client-side peer state cache policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Disconnect eviction policy.
    /// Default: retain
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

/// Client connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay hub URL.
    /// Default: ws://127.0.0.1:5080/poseHub
    #[serde(default = "ClientConfig::default_url")]
    pub url: String,

    /// How long to wait for the relay's welcome frame.
    /// Default: 5000
    #[serde(default = "ClientConfig::default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Store our own echoed poses in the cache like any other peer's.
    /// Default: true
    #[serde(default = "ClientConfig::default_track_self")]
    pub track_self: bool,
}

impl ClientConfig {
    fn default_url() -> String {
        "ws://127.0.0.1:5080/poseHub".to_string()
    }

    fn default_connect_timeout_ms() -> u64 {
        5_000
    }

    fn default_track_self() -> bool {
        true
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            connect_timeout_ms: Self::default_connect_timeout_ms(),
            track_self: Self::default_track_self(),
        }
    }
}

/// Broadcast channel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    #[serde(default)]
    pub pose: PoseConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub client: ClientConfig,
}
