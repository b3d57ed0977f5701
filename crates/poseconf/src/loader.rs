//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, EvictionPolicy, PosecastConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/posecast/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("posecast/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("posecast.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Overlay a TOML file onto `config`.
pub fn load_from_file(config: &mut PosecastConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Overlay TOML text onto `config`. Keys absent from the text keep their
/// current value, so files loaded later only override what they mention.
pub fn apply_toml(config: &mut PosecastConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("host").and_then(|v| v.as_str()) {
            config.infra.bind.host = v.to_string();
        }
        if let Some(v) = bind.get("http_port").and_then(|v| v.as_integer()) {
            config.infra.bind.http_port = to_unsigned(v, "bind.http_port")?;
        }
        if let Some(v) = bind.get("hub_path").and_then(|v| v.as_str()) {
            config.infra.bind.hub_path = v.to_string();
        }
    }

    if let Some(pose) = table.get("pose").and_then(|v| v.as_table()) {
        if let Some(v) = pose.get("vector_len").and_then(|v| v.as_integer()) {
            config.channel.pose.vector_len = to_unsigned(v, "pose.vector_len")?;
        }
        if let Some(v) = pose.get("separator").and_then(|v| v.as_str()) {
            config.channel.pose.separator = single_char(v, "pose.separator")?;
        }
    }

    if let Some(relay) = table.get("relay").and_then(|v| v.as_table()) {
        if let Some(v) = relay.get("queue_depth").and_then(|v| v.as_integer()) {
            config.channel.relay.queue_depth = to_unsigned(v, "relay.queue_depth")?;
        }
        if let Some(v) = relay.get("echo_to_sender").and_then(|v| v.as_bool()) {
            config.channel.relay.echo_to_sender = v;
        }
        if let Some(v) = relay.get("announce_presence").and_then(|v| v.as_bool()) {
            config.channel.relay.announce_presence = v;
        }
        if let Some(v) = relay.get("max_message_bytes").and_then(|v| v.as_integer()) {
            config.channel.relay.max_message_bytes = to_unsigned(v, "relay.max_message_bytes")?;
        }
    }

    if let Some(cache) = table.get("cache").and_then(|v| v.as_table()) {
        if let Some(v) = cache.get("eviction").and_then(|v| v.as_str()) {
            config.channel.cache.eviction = v.parse::<EvictionPolicy>()?;
        }
    }

    if let Some(client) = table.get("client").and_then(|v| v.as_table()) {
        if let Some(v) = client.get("url").and_then(|v| v.as_str()) {
            config.channel.client.url = v.to_string();
        }
        if let Some(v) = client.get("connect_timeout_ms").and_then(|v| v.as_integer()) {
            config.channel.client.connect_timeout_ms = to_unsigned(v, "client.connect_timeout_ms")?;
        }
        if let Some(v) = client.get("track_self").and_then(|v| v.as_bool()) {
            config.channel.client.track_self = v;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            config.infra.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.infra.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(
    config: &mut PosecastConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_overrides_from(config, sources, |key| env::var(key).ok())
}

/// Apply overrides from an arbitrary variable lookup.
///
/// `apply_env_overrides` passes the process environment; tests pass a map.
pub fn apply_overrides_from<F>(
    config: &mut PosecastConfig,
    sources: &mut ConfigSources,
    lookup: F,
) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut take = |key: &str| {
        let value = lookup(key);
        if value.is_some() {
            sources.env_overrides.push(key.to_string());
        }
        value
    };

    // Bind
    if let Some(v) = take("POSECAST_HOST") {
        config.infra.bind.host = v;
    }
    if let Some(v) = take("POSECAST_HTTP_PORT") {
        config.infra.bind.http_port = parse_env(&v, "POSECAST_HTTP_PORT")?;
    }
    if let Some(v) = take("POSECAST_HUB_PATH") {
        config.infra.bind.hub_path = v;
    }

    // Pose shape
    if let Some(v) = take("POSECAST_VECTOR_LEN") {
        config.channel.pose.vector_len = parse_env(&v, "POSECAST_VECTOR_LEN")?;
    }
    if let Some(v) = take("POSECAST_SEPARATOR") {
        config.channel.pose.separator = single_char(&v, "POSECAST_SEPARATOR")?;
    }

    // Relay
    if let Some(v) = take("POSECAST_QUEUE_DEPTH") {
        config.channel.relay.queue_depth = parse_env(&v, "POSECAST_QUEUE_DEPTH")?;
    }
    if let Some(v) = take("POSECAST_ECHO_TO_SENDER") {
        config.channel.relay.echo_to_sender = parse_bool(&v, "POSECAST_ECHO_TO_SENDER")?;
    }
    if let Some(v) = take("POSECAST_ANNOUNCE_PRESENCE") {
        config.channel.relay.announce_presence = parse_bool(&v, "POSECAST_ANNOUNCE_PRESENCE")?;
    }

    // Cache / client
    if let Some(v) = take("POSECAST_EVICTION") {
        config.channel.cache.eviction = v.parse()?;
    }
    if let Some(v) = take("POSECAST_URL") {
        config.channel.client.url = v;
    }
    if let Some(v) = take("POSECAST_TRACK_SELF") {
        config.channel.client.track_self = parse_bool(&v, "POSECAST_TRACK_SELF")?;
    }

    // Telemetry
    if let Some(v) = take("POSECAST_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
    }
    // Also support standard OTEL env var
    if let Some(v) = take("OTEL_EXPORTER_OTLP_ENDPOINT") {
        config.infra.telemetry.otlp_endpoint = v;
    }
    if let Some(v) = take("POSECAST_LOG_LEVEL") {
        config.infra.telemetry.log_level = v;
    }
    // Also support RUST_LOG
    if let Some(v) = take("RUST_LOG") {
        config.infra.telemetry.log_level = v;
    }

    Ok(())
}

fn to_unsigned<T: TryFrom<i64>>(value: i64, key: &str) -> Result<T, ConfigError> {
    T::try_from(value).map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("{value} is out of range"),
    })
}

fn single_char(value: &str, key: &str) -> Result<char, ConfigError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("expected exactly one character, got {value:?}"),
        }),
    }
}

fn parse_env<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        message: format!("cannot parse {value:?}"),
    })
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_string(),
            message: format!("expected a boolean, got {value:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[pose]
vector_len = 7
"#;
        let mut config = PosecastConfig::default();
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.channel.pose.vector_len, 7);
        // Other values should be defaults
        assert_eq!(config.channel.pose.separator, ',');
        assert_eq!(config.infra.bind.http_port, 5080);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[bind]
host = "127.0.0.1"
http_port = 9000
hub_path = "/chatHub"

[pose]
vector_len = 7
separator = ";"

[relay]
queue_depth = 8
echo_to_sender = false
announce_presence = true
max_message_bytes = 1024

[cache]
eviction = "evict_on_disconnect"

[client]
url = "ws://relay:9000/chatHub"
connect_timeout_ms = 250
track_self = false

[telemetry]
log_level = "debug"
"#;
        let mut config = PosecastConfig::default();
        apply_toml(&mut config, toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.infra.bind.host, "127.0.0.1");
        assert_eq!(config.infra.bind.http_port, 9000);
        assert_eq!(config.infra.bind.hub_path, "/chatHub");
        assert_eq!(config.channel.pose.vector_len, 7);
        assert_eq!(config.channel.pose.separator, ';');
        assert_eq!(config.channel.relay.queue_depth, 8);
        assert!(!config.channel.relay.echo_to_sender);
        assert!(config.channel.relay.announce_presence);
        assert_eq!(config.channel.relay.max_message_bytes, 1024);
        assert_eq!(config.channel.cache.eviction, EvictionPolicy::EvictOnDisconnect);
        assert_eq!(config.channel.client.url, "ws://relay:9000/chatHub");
        assert_eq!(config.channel.client.connect_timeout_ms, 250);
        assert!(!config.channel.client.track_self);
        assert_eq!(config.infra.telemetry.log_level, "debug");
    }

    #[test]
    fn test_later_file_only_overrides_what_it_mentions() {
        let mut config = PosecastConfig::default();
        apply_toml(&mut config, "[bind]\nhttp_port = 9000\n", Path::new("a.toml")).unwrap();
        apply_toml(&mut config, "[pose]\nvector_len = 4\n", Path::new("b.toml")).unwrap();

        assert_eq!(config.infra.bind.http_port, 9000);
        assert_eq!(config.channel.pose.vector_len, 4);
    }

    #[test]
    fn test_rejects_multi_char_separator() {
        let mut config = PosecastConfig::default();
        let err = apply_toml(&mut config, "[pose]\nseparator = \",,\"\n", Path::new("t.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_negative_port() {
        let mut config = PosecastConfig::default();
        let err = apply_toml(&mut config, "[bind]\nhttp_port = -1\n", Path::new("t.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "bind.http_port"));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let mut config = PosecastConfig::default();
        let err = apply_toml(&mut config, "[bind\n", Path::new("broken.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posecast.toml");
        std::fs::write(&path, "[relay]\nannounce_presence = true\n").unwrap();

        let mut config = PosecastConfig::default();
        load_from_file(&mut config, &path).unwrap();
        assert!(config.channel.relay.announce_presence);

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            load_from_file(&mut config, &missing),
            Err(ConfigError::FileRead { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("POSECAST_HTTP_PORT", "6000"),
            ("POSECAST_VECTOR_LEN", "7"),
            ("POSECAST_ANNOUNCE_PRESENCE", "yes"),
            ("POSECAST_EVICTION", "evict_on_disconnect"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "collector:4317"),
        ]
        .into_iter()
        .collect();

        let mut config = PosecastConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_from(&mut config, &mut sources, |k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.infra.bind.http_port, 6000);
        assert_eq!(config.channel.pose.vector_len, 7);
        assert!(config.channel.relay.announce_presence);
        assert_eq!(config.channel.cache.eviction, EvictionPolicy::EvictOnDisconnect);
        assert_eq!(config.infra.telemetry.otlp_endpoint, "collector:4317");
        assert_eq!(sources.env_overrides.len(), 5);
        assert!(sources.env_overrides.contains(&"POSECAST_VECTOR_LEN".to_string()));
    }

    #[test]
    fn test_env_override_bad_bool() {
        let mut config = PosecastConfig::default();
        let mut sources = ConfigSources::default();
        let result = apply_overrides_from(&mut config, &mut sources, |k| {
            (k == "POSECAST_TRACK_SELF").then(|| "maybe".to_string())
        });
        assert!(result.is_err());
    }
}
