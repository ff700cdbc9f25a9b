//! REST API layer: route handlers, DTOs, router composition and the
//! OpenAPI document.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and the
//! WebSocket upgrades live at the root.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the HTTP surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "pulse-gateway",
        description = "Real-time event distribution over WebSocket"
    ),
    paths(handlers::system::health_handler, handlers::events::publish_event),
    components(schemas(
        dto::HealthResponse,
        dto::PublishEventRequest,
        dto::PublishEventResponse,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    )),
    tags(
        (name = "System", description = "Service health"),
        (name = "Events", description = "Inject events for WebSocket fan-out"),
    )
)]
pub struct ApiDoc;

/// Builds the complete router: REST endpoints, health and WebSocket
/// upgrades.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
        .merge(crate::ws::routes())
}
