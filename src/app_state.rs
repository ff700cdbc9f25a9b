//! Shared application state injected into all Axum handlers.

use crate::ws::Broadcaster;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    /// Fan-out to every connected WebSocket client.
    pub broadcaster: Broadcaster,
}

impl AppState {
    /// Wraps an existing broadcaster.
    #[must_use]
    pub const fn new(broadcaster: Broadcaster) -> Self {
        Self { broadcaster }
    }
}
