//! Event publishing: lets an HTTP caller fan an envelope out to the
//! connected WebSocket clients.
//!
//! Price and portfolio updates follow the same subscription filters as the
//! server's own broadcasts; every other type reaches all clients.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{PublishEventRequest, PublishEventResponse};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};
use crate::protocol::{Envelope, EventType};

/// `POST /events` — Broadcast an envelope to all clients.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] when the type is empty, names a
/// client control message, or is a price or portfolio update without its
/// `symbol` or `portfolioId` key.
#[utoipa::path(
    post,
    path = "/api/v1/events",
    tag = "Events",
    summary = "Broadcast an event",
    description = "Wraps `data` in an envelope of the given `type` and queues it for the connected WebSocket clients. Price and portfolio updates only reach clients subscribed to `data.symbol` or `data.portfolioId`.",
    request_body = PublishEventRequest,
    responses(
        (status = 202, description = "Event queued for delivery", body = PublishEventResponse),
        (status = 400, description = "Invalid event type or missing routing key", body = ErrorResponse),
    )
)]
pub async fn publish_event(
    State(state): State<AppState>,
    Json(req): Json<PublishEventRequest>,
) -> Result<impl IntoResponse, GatewayError> {
    let name = req.event_type.trim();
    if name.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "event type must not be empty".to_string(),
        ));
    }
    let event_type = EventType::from(name);
    if event_type.is_control() {
        return Err(GatewayError::InvalidRequest(format!(
            "`{event_type}` is a client control message"
        )));
    }

    let broadcaster = &state.broadcaster;
    let delivered = match event_type {
        EventType::PriceUpdated | EventType::LegacyPriceUpdate => {
            let symbol = routing_key(&req.data, "symbol")?;
            let envelope = Envelope::new(event_type, req.data);
            broadcaster
                .broadcast_where(&envelope, |subs| subs.matches_symbol(&symbol))
                .await
        }
        EventType::PortfolioUpdated | EventType::LegacyPortfolioUpdate => {
            let portfolio_id = routing_key(&req.data, "portfolioId")?;
            let envelope = Envelope::new(event_type, req.data);
            broadcaster
                .broadcast_where(&envelope, |subs| subs.matches_portfolio(&portfolio_id))
                .await
        }
        _ => broadcaster.broadcast_custom_message(event_type, req.data).await,
    };
    tracing::debug!(event_type = %name, delivered, "published event over http");

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishEventResponse {
            event_type: name.to_string(),
            delivered,
        }),
    ))
}

fn routing_key(data: &serde_json::Value, key: &str) -> Result<String, GatewayError> {
    data.get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::InvalidRequest(format!("`data.{key}` must be a non-empty string")))
}

/// Event routes, mounted under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new().route("/events", post(publish_event))
}
