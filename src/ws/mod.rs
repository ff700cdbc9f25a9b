//! WebSocket layer: broadcaster, per-connection loop, subscriptions.
//!
//! Clients connect at `/ws` or `/ws/{channel}` and receive every envelope
//! the [`Broadcaster`] fans out, plus the price and portfolio updates
//! they subscribed to.

pub mod broadcaster;
pub mod client_id;
pub mod connection;
pub mod handler;
pub mod subscription;

pub use broadcaster::{Broadcaster, Registration, TaskPhase};
pub use client_id::ClientId;
pub use subscription::SubscriptionManager;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// WebSocket upgrade routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(handler::ws_handler))
        .route("/ws/{channel}", get(handler::channel_ws_handler))
}
