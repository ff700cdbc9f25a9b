//! Axum WebSocket upgrade handlers.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;

/// `GET /ws` — Upgrade HTTP connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| run_connection(socket, broadcaster, None))
}

/// `GET /ws/{channel}` — Upgrade to WebSocket on a named channel path.
///
/// The channel is informational: it is echoed in the welcome and logged,
/// every client still receives every broadcast.
pub async fn channel_ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let broadcaster = state.broadcaster.clone();
    ws.on_upgrade(move |socket| run_connection(socket, broadcaster, Some(channel)))
}
