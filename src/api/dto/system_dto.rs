//! DTOs for the system endpoints.

use serde::Serialize;
use utoipa::ToSchema;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `"healthy"` while the process serves requests.
    pub status: String,
    /// Server time as RFC 3339.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
    /// Live WebSocket clients.
    pub clients: usize,
}
