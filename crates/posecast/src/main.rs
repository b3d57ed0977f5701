//! posecast - live pose broadcast relay and CLI
//!
//! Subcommands:
//! - `posecast serve` - Run the relay (WebSocket hub + health endpoint)
//! - `posecast watch [url]` - Print every peer's latest pose once per tick
//! - `posecast publish <url> <payload>` - Publish one pose
//! - `posecast orbit [url]` - Publish a moving demo pose
//! - `posecast config` - Show the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poseconf::PosecastConfig;

use posecast::{commands, serve, telemetry};

#[derive(Parser)]
#[command(name = "posecast")]
#[command(about = "Live pose broadcast relay for shared 3D scenes")]
#[command(version)]
struct Cli {
    /// Config file to load after the system and user configs
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay
    Serve {
        /// HTTP port to bind (overrides bind.http_port)
        #[arg(short, long)]
        port: Option<u16>,

        /// OTLP gRPC endpoint for OpenTelemetry (overrides telemetry.otlp_endpoint)
        #[arg(long)]
        otlp_endpoint: Option<String>,

        /// Log to stderr only, without OTLP export
        #[arg(long)]
        no_otel: bool,
    },

    /// Connect and print peer poses as they change
    Watch {
        /// Relay hub URL (defaults to client.url)
        url: Option<String>,

        /// Render tick in milliseconds
        #[arg(short, long, default_value = "100")]
        tick_ms: u64,
    },

    /// Publish a single pose payload
    Publish {
        /// Relay hub URL (e.g., ws://localhost:5080/poseHub)
        url: String,

        /// Delimited pose payload (e.g., "1,2,3")
        payload: String,
    },

    /// Publish a pose swinging side to side in front of the camera
    Orbit {
        /// Relay hub URL (defaults to client.url)
        url: Option<String>,

        /// Swing amplitude
        #[arg(short, long, default_value = "5.0")]
        radius: f64,

        /// Updates per second
        #[arg(long, default_value = "30.0")]
        rate_hz: f64,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration_secs: Option<u64>,
    },

    /// Show the effective configuration and its sources
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config =
        PosecastConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;

    // For serve command, use full OTEL; for CLI commands, use simple tracing
    let use_otel = matches!(cli.command, Commands::Serve { no_otel: false, .. });
    if !use_otel {
        telemetry::init_simple(&config.infra.telemetry.log_level);
    }

    match cli.command {
        Commands::Serve {
            port,
            otlp_endpoint,
            no_otel: _,
        } => {
            if let Some(port) = port {
                config.infra.bind.http_port = port;
            }
            if let Some(endpoint) = otlp_endpoint {
                config.infra.telemetry.otlp_endpoint = endpoint;
            }
            if use_otel {
                telemetry::init(
                    &config.infra.telemetry.otlp_endpoint,
                    &config.infra.telemetry.log_level,
                )?;
            }

            serve::run(config).await?;
        }
        Commands::Watch { url, tick_ms } => {
            let url = url.unwrap_or_else(|| config.channel.client.url.clone());
            commands::watch(&url, &config, tick_ms).await?;
        }
        Commands::Publish { url, payload } => {
            commands::publish(&url, &payload, &config).await?;
        }
        Commands::Orbit {
            url,
            radius,
            rate_hz,
            duration_secs,
        } => {
            let url = url.unwrap_or_else(|| config.channel.client.url.clone());
            commands::orbit(&url, &config, radius, rate_hz, duration_secs).await?;
        }
        Commands::Config => {
            commands::show_config(cli.config.as_deref())?;
        }
    }

    Ok(())
}
