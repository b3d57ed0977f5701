//! Minimal configuration loading for posecast.
//!
//! Every posecast crate depends on this one, so it stays small: serde, toml,
//! and platform directories only.
//!
//! # Configuration Philosophy
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): where the relay listens and where
//!   telemetry goes. Fixed for the lifetime of a process.
//!
//! - **Channel** (`ChannelConfig`): the shape of the broadcast channel itself:
//!   pose vector length and separator, relay fan-out behaviour, and the
//!   client-side cache policy. Relay and clients of one deployment must agree
//!   on the `[pose]` section.
//!
//! # Usage
//!
//! ```rust,no_run
//! use poseconf::PosecastConfig;
//!
//! let config = PosecastConfig::load().expect("Failed to load config");
//!
//! println!("Hub: {}:{}{}", config.infra.bind.host, config.infra.bind.http_port, config.infra.bind.hub_path);
//! println!("Vector length: {}", config.channel.pose.vector_len);
//! ```
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/posecast/config.toml` (system)
//! 2. `~/.config/posecast/config.toml` (user)
//! 3. `./posecast.toml` (local override, or the `--config` path)
//! 4. Environment variables (`POSECAST_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! host = "0.0.0.0"
//! http_port = 5080
//! hub_path = "/poseHub"
//!
//! [pose]
//! vector_len = 3
//! separator = ","
//!
//! [relay]
//! queue_depth = 64
//! echo_to_sender = true
//! announce_presence = false
//!
//! [cache]
//! eviction = "retain"
//!
//! [client]
//! url = "ws://127.0.0.1:5080/poseHub"
//! track_self = true
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info,posecast=debug"
//! ```

pub mod channel;
pub mod infra;
pub mod loader;

pub use channel::{CacheConfig, ChannelConfig, ClientConfig, EvictionPolicy, PoseConfig, RelayConfig};
pub use infra::{BindConfig, InfraConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Complete posecast configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PosecastConfig {
    /// Infrastructure - fixed per process.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Broadcast channel shape and policies.
    #[serde(flatten)]
    pub channel: ChannelConfig,
}

impl PosecastConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/posecast/config.toml`
    /// 3. `~/.config/posecast/config.toml`
    /// 4. `./posecast.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env overrides.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./posecast.toml` override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from optional path and return information about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = PosecastConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::load_from_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources)?;
        config.validate()?;

        Ok((config, sources))
    }

    /// Check cross-field invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.pose.validate()?;

        if self.channel.relay.queue_depth == 0 {
            return Err(ConfigError::Invalid {
                key: "relay.queue_depth".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if !self.infra.bind.hub_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "bind.hub_path".to_string(),
                message: format!("must start with '/', got {:?}", self.infra.bind.hub_path),
            });
        }

        if matches!(self.infra.bind.hub_path.as_str(), "/" | "/health") {
            return Err(ConfigError::Invalid {
                key: "bind.hub_path".to_string(),
                message: format!("{} is reserved", self.infra.bind.hub_path),
            });
        }

        Ok(())
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# posecast configuration\n\n");

        output.push_str("[bind]\n");
        output.push_str(&format!("host = \"{}\"\n", self.infra.bind.host));
        output.push_str(&format!("http_port = {}\n", self.infra.bind.http_port));
        output.push_str(&format!("hub_path = \"{}\"\n", self.infra.bind.hub_path));

        output.push_str("\n[pose]\n");
        output.push_str(&format!("vector_len = {}\n", self.channel.pose.vector_len));
        output.push_str(&format!("separator = \"{}\"\n", self.channel.pose.separator));

        output.push_str("\n[relay]\n");
        output.push_str(&format!("queue_depth = {}\n", self.channel.relay.queue_depth));
        output.push_str(&format!(
            "echo_to_sender = {}\n",
            self.channel.relay.echo_to_sender
        ));
        output.push_str(&format!(
            "announce_presence = {}\n",
            self.channel.relay.announce_presence
        ));
        output.push_str(&format!(
            "max_message_bytes = {}\n",
            self.channel.relay.max_message_bytes
        ));

        output.push_str("\n[cache]\n");
        output.push_str(&format!(
            "eviction = \"{}\"\n",
            self.channel.cache.eviction.as_str()
        ));

        output.push_str("\n[client]\n");
        output.push_str(&format!("url = \"{}\"\n", self.channel.client.url));
        output.push_str(&format!(
            "connect_timeout_ms = {}\n",
            self.channel.client.connect_timeout_ms
        ));
        output.push_str(&format!("track_self = {}\n", self.channel.client.track_self));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!(
            "otlp_endpoint = \"{}\"\n",
            self.infra.telemetry.otlp_endpoint
        ));
        output.push_str(&format!(
            "log_level = \"{}\"\n",
            self.infra.telemetry.log_level
        ));

        output
    }
}
