//! Client-side CLI commands

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use peercache::{ClientOptions, PeerStateCache, PoseClient, RelayEvent};
use poseconf::PosecastConfig;
use poseproto::{ConnectionId, PoseVector};
use tracing::{debug, info};

/// Validate that a URL looks like a relay hub address
fn validate_url(url: &str) -> Result<()> {
    if !url.starts_with("ws://") {
        bail!(
            "Invalid relay URL: '{}'\n\n\
             Relay URLs are WebSocket URIs including the hub path:\n  \
             ws://localhost:5080/poseHub\n  \
             ws://192.168.1.10:5080/poseHub",
            url
        );
    }
    Ok(())
}

async fn connect(url: &str, config: &PosecastConfig) -> Result<PoseClient> {
    validate_url(url)?;
    PoseClient::connect(url, ClientOptions::from_config(&config.channel))
        .await
        .with_context(|| format!("Failed to connect to relay at {}", url))
}

/// Connect, keep a cache, and print it once per tick whenever it changed.
///
/// A terminal stand-in for a render loop: events and ticks share one task,
/// so every printed table is a consistent snapshot.
pub async fn watch(url: &str, config: &PosecastConfig, tick_ms: u64) -> Result<()> {
    let mut client = connect(url, config).await?;
    let mut cache = PeerStateCache::from_config(&config.channel);
    let me = client.id();
    println!("Watching {} as {}", url, me.short());

    let mut tick = tokio::time::interval(Duration::from_millis(tick_ms.max(1)));
    let mut last_printed = None;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let stats = cache.stats();
                let marker = (stats.applied, stats.evicted, cache.len());
                if last_printed != Some(marker) {
                    render(&cache, me);
                    last_printed = Some(marker);
                }
            }
            event = client.next_event() => match event {
                Some(Ok(event)) => {
                    if let RelayEvent::Notice(message) = &event {
                        println!("relay: {}", message);
                    }
                    client.apply(&mut cache, &event);
                }
                Some(Err(e)) => return Err(e).context("Relay connection failed"),
                None => {
                    println!("Relay closed the connection");
                    return Ok(());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing");
                break;
            }
        }
    }

    client.close().await?;
    Ok(())
}

fn render(cache: &PeerStateCache, me: ConnectionId) {
    let stats = cache.stats();
    println!(
        "peers: {} (applied {}, dropped {})",
        cache.len(),
        stats.applied,
        stats.dropped
    );

    let mut peers: Vec<_> = cache.snapshot().into_iter().collect();
    peers.sort_by_key(|(id, _)| *id);
    for (id, pose) in peers {
        let suffix = if id == me { "  (you)" } else { "" };
        println!("  {}  {}{}", id.short(), pose, suffix);
    }
}

/// Publish one payload and exit.
pub async fn publish(url: &str, payload: &str, config: &PosecastConfig) -> Result<()> {
    let codec = poseproto::PoseCodec::from(&config.channel.pose);
    let pose = codec
        .decode(payload)
        .with_context(|| format!("'{}' is not a valid {}-component pose", payload, codec.vector_len()))?;

    let mut client = connect(url, config).await?;
    client.publish(&pose).await?;
    println!("Published {} as {}", pose, client.id().short());
    client.close().await?;
    Ok(())
}

/// The pose the demo object follows: a horizontal swing in front of the
/// camera. Components past the third are zero.
pub fn orbit_pose(elapsed_secs: f64, radius: f64, vector_len: usize) -> PoseVector {
    let mut components = vec![0.0; vector_len];
    components[0] = elapsed_secs.sin() * radius;
    components[2] = -10.0;
    PoseVector::new(components)
}

/// Tick period for `rate_hz` updates per second. Rates whose period
/// overflows a `Duration` or rounds down to zero are rejected.
pub fn publish_period(rate_hz: f64) -> Result<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        bail!("rate must be a positive number of updates per second, got {}", rate_hz);
    }
    match Duration::try_from_secs_f64(1.0 / rate_hz) {
        Ok(period) if !period.is_zero() => Ok(period),
        _ => bail!("rate of {} updates per second is out of range", rate_hz),
    }
}

/// Publish a moving pose at `rate_hz` until interrupted or `duration_secs`
/// elapses.
pub async fn orbit(
    url: &str,
    config: &PosecastConfig,
    radius: f64,
    rate_hz: f64,
    duration_secs: Option<u64>,
) -> Result<()> {
    let vector_len = config.channel.pose.vector_len;
    if vector_len < 3 {
        bail!("orbit needs at least 3 pose components, relay is configured for {}", vector_len);
    }
    let period = publish_period(rate_hz)?;

    let mut client = connect(url, config).await?;
    println!("Orbiting as {} (radius {}, {} Hz)", client.id().short(), radius, rate_hz);

    let start = Instant::now();
    let deadline = duration_secs.map(Duration::from_secs);
    let mut tick = tokio::time::interval(period);
    let mut sent: u64 = 0;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let elapsed = start.elapsed();
                if deadline.is_some_and(|d| elapsed >= d) {
                    break;
                }
                let pose = orbit_pose(elapsed.as_secs_f64(), radius, vector_len);
                client.publish(&pose).await?;
                sent += 1;
            }
            // Keep our inbound queue moving; we don't render anything
            event = client.next_event() => match event {
                Some(Ok(RelayEvent::Notice(message))) => println!("relay: {}", message),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Relay connection failed"),
                None => bail!("Relay closed the connection"),
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    debug!(sent, "orbit finished");
    println!("Published {} poses", sent);
    client.close().await?;
    Ok(())
}

/// Print the effective configuration and where it came from.
pub fn show_config(config_path: Option<&Path>) -> Result<()> {
    let (config, sources) = PosecastConfig::load_with_sources_from(config_path)
        .context("Failed to load configuration")?;

    println!("# Sources:");
    if sources.files.is_empty() {
        println!("#   (no config files, using defaults)");
    }
    for file in &sources.files {
        println!("#   file: {}", file.display());
    }
    for var in &sources.env_overrides {
        println!("#   env:  {}", var);
    }
    println!();
    print!("{}", config.to_toml());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_url() {
        assert!(validate_url("ws://localhost:5080/poseHub").is_ok());
        assert!(validate_url("http://localhost:5080/poseHub").is_err());
        assert!(validate_url("localhost:5080").is_err());
    }

    #[test]
    fn test_publish_period() {
        assert_eq!(publish_period(30.0).unwrap(), Duration::from_secs_f64(1.0 / 30.0));
        assert_eq!(publish_period(0.5).unwrap(), Duration::from_secs(2));

        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY, 1e10, 1e-30] {
            assert!(publish_period(rate).is_err(), "rate {rate} should be rejected");
        }
    }

    #[test]
    fn test_orbit_pose() {
        let pose = orbit_pose(0.0, 5.0, 3);
        assert_eq!(pose.as_slice(), &[0.0, 0.0, -10.0]);

        let pose = orbit_pose(std::f64::consts::FRAC_PI_2, 5.0, 7);
        assert_eq!(pose.len(), 7);
        assert!((pose[0] - 5.0).abs() < 1e-12);
        assert_eq!(pose[2], -10.0);
        assert_eq!(pose[6], 0.0);
    }
}
