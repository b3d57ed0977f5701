//! WebSocket endpoint for the broadcast channel.
//!
//! One writer task per connection drains the relay queue into the socket;
//! the upgrade task itself reads client frames and publishes them. Either
//! side ending tears the connection down and removes it from the relay.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use poseproto::ClientFrame;
use tracing::{debug, warn, Instrument};

use crate::relay::{Relay, Subscription};
use crate::serve::AppState;

/// How long the writer gets to flush queued frames after the reader stops.
const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Upgrade handler mounted at the configured hub path.
#[tracing::instrument(name = "posecast.hub.upgrade", skip_all)]
pub async fn hub_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let max_bytes = state.relay.config().max_message_bytes;
    ws.max_message_size(max_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state.relay))
}

async fn handle_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (id, outbound) = relay.connect();
    let span = tracing::info_span!("posecast.hub.connection", peer = %id.short());

    async move {
        let (sender, mut receiver) = socket.split();
        let mut writer = tokio::spawn(write_loop(sender, outbound).in_current_span());

        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match ClientFrame::decode(text.as_str()) {
                    Ok(ClientFrame::Publish { payload }) => {
                        if let Err(e) = relay.publish(id, payload) {
                            warn!(error = %e, "publish rejected");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "unparseable client frame");
                        relay.notice(id, format!("unparseable frame: {e}"));
                    }
                },
                Ok(Message::Binary(_)) => {
                    warn!("binary frame from client");
                    relay.notice(id, "binary frames are not supported");
                }
                Ok(Message::Close(_)) => {
                    debug!("client sent close");
                    break;
                }
                // Ping/pong are answered by axum
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "read error");
                    break;
                }
            }
        }

        relay.disconnect(id);

        if tokio::time::timeout(WRITER_DRAIN, &mut writer).await.is_err() {
            writer.abort();
        }
    }
    .instrument(span)
    .await
}

async fn write_loop(
    mut sender: futures::stream::SplitSink<WebSocket, Message>,
    mut outbound: Subscription,
) {
    while let Some(text) = outbound.recv().await {
        if let Err(e) = sender.send(Message::Text(text)).await {
            debug!(error = %e, "write failed, stopping writer");
            return;
        }
    }
    let _ = sender.close().await;
}
