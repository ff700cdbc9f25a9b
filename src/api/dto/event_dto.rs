//! DTOs for publishing events through the REST surface.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Request body for `POST /events`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishEventRequest {
    /// Routing key of the envelope (e.g. `"alertRaised"`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Payload delivered verbatim as the envelope's `data`.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

/// Response body for `POST /events` (202 Accepted).
#[derive(Debug, Serialize, ToSchema)]
pub struct PublishEventResponse {
    /// Routing key echoed from the request.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Number of clients the envelope was queued for.
    pub delivered: usize,
}
