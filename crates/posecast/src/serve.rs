//! Relay server: hub route, health, and discovery.

use anyhow::{Context, Result};
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use poseconf::PosecastConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::info;

use crate::hub::hub_upgrade;
use crate::relay::Relay;

/// Shared state for every route.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub hub_path: Arc<str>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(relay: Arc<Relay>, hub_path: &str) -> Self {
        Self {
            relay,
            hub_path: hub_path.into(),
            start_time: Instant::now(),
        }
    }
}

/// Health check endpoint
pub async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed();
    let stats = state.relay.stats();

    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": uptime.as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "vector_len": state.relay.vector_len(),
        "separator": state.relay.separator().to_string(),
        "live_connections": stats.live_connections,
        "connections_accepted": stats.connections_accepted,
        "publishes": stats.publishes,
        "frames_queued": stats.frames_queued,
        "frames_dropped": stats.frames_dropped,
    }))
}

/// Serve root discovery endpoint
async fn serve_root(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "posecast",
        "version": env!("CARGO_PKG_VERSION"),
        "links": {
            "hub": &*state.hub_path,
            "health": "/health",
        }
    }))
}

pub fn router(state: AppState) -> Router {
    let hub_path = state.hub_path.to_string();
    Router::new()
        .route(&hub_path, get(hub_upgrade))
        .route("/health", get(handle_health))
        .route("/", get(serve_root))
        .with_state(state)
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_with_shutdown<F>(listener: TcpListener, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Run the relay until SIGINT/SIGTERM.
pub async fn run(config: PosecastConfig) -> Result<()> {
    let bind = &config.infra.bind;
    let channel = &config.channel;

    info!("📡 posecast relay starting");
    info!("   Pose: {} components, separator {:?}", channel.pose.vector_len, channel.pose.separator);
    info!(
        "   Relay: queue_depth={} echo_to_sender={} announce_presence={}",
        channel.relay.queue_depth, channel.relay.echo_to_sender, channel.relay.announce_presence
    );

    let relay = Relay::new_shared(channel);
    let state = AppState::new(relay, &bind.hub_path);

    let addr = bind.socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("📡 posecast ready!");
    info!("   Hub: ws://{}{}", addr, bind.hub_path);
    info!("   Health: GET http://{}/health", addr);

    serve_with_shutdown(listener, state, shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}
