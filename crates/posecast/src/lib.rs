//! posecast - real-time pose broadcast relay
//!
//! One WebSocket hub, N clients, present-value only. Every `publish` a client
//! sends is fanned out as a `deliver` to every live connection. The relay
//! keeps no pose state; clients keep their own `peercache::PeerStateCache`.
//!
//! - `relay`: live connection set and fan-out
//! - `hub`: WebSocket upgrade handler
//! - `serve`: router, health, graceful shutdown
//! - `commands`: client-side CLI commands
//! - `telemetry`: tracing / OpenTelemetry setup

pub mod commands;
pub mod hub;
pub mod relay;
pub mod serve;
pub mod telemetry;

pub use relay::{FanOut, Relay, RelayError, RelayStats, Subscription};
pub use serve::{router, serve_with_shutdown, AppState};
