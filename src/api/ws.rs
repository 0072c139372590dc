// =============================================================================
// WebSocket Handler — push-based snapshot feed
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive a full
// StateSnapshot immediately, then a fresh one whenever the state version has
// moved since the last push.  Ticker traffic keeps the version hot, so the
// check runs every 250 ms.  Ping frames get Pong replies; any receive error
// or Close frame ends the connection.
// =============================================================================

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::api::rest::ApiContext;
use crate::app_state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Axum handler for the WebSocket upgrade request. The token arrives as a
/// query parameter because browsers cannot set headers on websocket opens.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    if !validate_token(&query.token.unwrap_or_default()) {
        warn!("WebSocket connection rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| run_connection(socket, ctx.state))
        .into_response()
}

/// Drive one connection: push snapshots on version change, answer pings,
/// stop on close/error.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut last_sent_version: u64 = 0;

    if send_snapshot(&mut sender, &state).await.is_err() {
        warn!("failed to send initial WebSocket snapshot");
        return;
    }
    last_sent_version = state.current_state_version();

    let mut push_interval = interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = push_interval.tick() => {
                let current = state.current_state_version();
                if current != last_sent_version {
                    if send_snapshot(&mut sender, &state).await.is_err() {
                        debug!("WebSocket send failed — disconnecting");
                        break;
                    }
                    last_sent_version = current;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "WebSocket text message ignored");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket connection closed by client");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection finished");
}

/// Serialise and push the current snapshot, bumping the global sequence
/// number.
async fn send_snapshot<S>(sender: &mut S, state: &Arc<AppState>) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let seq = state
        .ws_sequence_number
        .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let snapshot = state.build_snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(version = snapshot.state_version, seq, "WebSocket snapshot sent");
            Ok(())
        }
        Err(e) => {
            // A serialisation error is not a transport error; keep the
            // connection and skip this push.
            warn!(error = %e, "failed to serialise snapshot");
            Ok(())
        }
    }
}
