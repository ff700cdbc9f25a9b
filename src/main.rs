//! pulse-gateway server entry point.
//!
//! Starts the Axum HTTP server with the health, event-publishing and
//! WebSocket endpoints.

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pulse_gateway::api;
use pulse_gateway::app_state::AppState;
use pulse_gateway::config::GatewayConfig;
use pulse_gateway::ws::Broadcaster;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = GatewayConfig::from_env().context("invalid LISTEN_ADDR")?;
    tracing::info!(addr = %config.listen_addr, "starting pulse-gateway");

    let broadcaster = Broadcaster::new(config.client_queue_capacity);
    let app_state = AppState::new(broadcaster.clone());

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .merge(swagger())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let closed = broadcaster.close_all().await;
                tracing::info!(closed, "shutting down");
            }
        })
        .await?;

    Ok(())
}

#[cfg(feature = "swagger-ui")]
fn swagger() -> Router<AppState> {
    use utoipa::OpenApi;
    use utoipa_swagger_ui::SwaggerUi;

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api::ApiDoc::openapi()))
}

#[cfg(not(feature = "swagger-ui"))]
fn swagger() -> Router<AppState> {
    Router::new()
}
