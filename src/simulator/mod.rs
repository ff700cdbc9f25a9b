//! Synthetic event generator: a standalone server speaking the same wire
//! protocol as the production broadcaster.
//!
//! It drives [`crate::client::ConnectionManager`] in tests without a live
//! backend. Events are emitted on demand through the `simulate_*` calls
//! or continuously through [`SyntheticEventGenerator::start_random_traffic`].
//! Connected clients get the full server behaviour: `connected` welcome,
//! `ping`/`pong`, and price/portfolio subscriptions.

pub mod traffic;

pub use traffic::TrafficProfile;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::error::SimulatorError;
use crate::protocol::{Envelope, EventType};
use crate::ws::{Broadcaster, TaskPhase};

/// How long [`SyntheticEventGenerator::shutdown`] waits for the server task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AgentStatus<'a> {
    agent_id: &'a str,
    status: &'a str,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskUpdate<'a> {
    task_id: &'a str,
    agent_id: &'a str,
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    at: chrono::DateTime<Utc>,
}

/// State shared between the generator handle and its traffic task.
#[derive(Debug)]
pub(crate) struct Shared {
    broadcaster: Broadcaster,
    prices: Mutex<HashMap<String, f64>>,
    portfolios: Mutex<HashMap<String, f64>>,
    task_seq: AtomicU64,
    alert_seq: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new(broadcaster: Broadcaster) -> Self {
        Self {
            broadcaster,
            prices: Mutex::new(HashMap::new()),
            portfolios: Mutex::new(HashMap::new()),
            task_seq: AtomicU64::new(0),
            alert_seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_task_id(&self) -> String {
        format!("task-{}", self.task_seq.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Records `price` and returns the percent change against the last
    /// recorded price of `symbol`.
    fn record_price(&self, symbol: &str, price: f64) -> f64 {
        let previous = lock(&self.prices).insert(symbol.to_string(), price);
        match previous {
            Some(prev) if prev > 0.0 => (price - prev) / prev * 100.0,
            _ => 0.0,
        }
    }

    pub(crate) fn drift_price(&self, symbol: &str, drift: f64) -> f64 {
        let last = lock(&self.prices).get(symbol).copied().unwrap_or(100.0);
        (last * (1.0 + drift)).max(0.01)
    }

    pub(crate) fn drift_portfolio(&self, portfolio_id: &str, drift: f64) -> f64 {
        let mut values = lock(&self.portfolios);
        let value = values.entry(portfolio_id.to_string()).or_insert(10_000.0);
        *value = (*value * (1.0 + drift)).max(0.0);
        *value
    }

    pub(crate) async fn agent_status(
        &self,
        agent_id: &str,
        status: &str,
    ) -> Result<usize, serde_json::Error> {
        let agent = AgentStatus {
            agent_id,
            status,
            updated_at: Utc::now(),
        };
        self.broadcaster.broadcast_agent_update(&agent).await
    }

    pub(crate) async fn task_started(
        &self,
        task_id: &str,
        agent_id: &str,
    ) -> Result<usize, serde_json::Error> {
        let task = TaskUpdate {
            task_id,
            agent_id,
            status: "running",
            success: None,
            at: Utc::now(),
        };
        self.broadcaster
            .broadcast_task_update(TaskPhase::Started, &task)
            .await
    }

    pub(crate) async fn task_finished(
        &self,
        task_id: &str,
        agent_id: &str,
        success: bool,
    ) -> Result<usize, serde_json::Error> {
        let task = TaskUpdate {
            task_id,
            agent_id,
            status: if success { "completed" } else { "failed" },
            success: Some(success),
            at: Utc::now(),
        };
        self.broadcaster
            .broadcast_task_update(TaskPhase::Finished, &task)
            .await
    }

    pub(crate) async fn price(&self, symbol: &str, price: f64) -> usize {
        let change = self.record_price(symbol, price);
        let data = json!({
            "symbol": symbol,
            "price": price,
            "change24h": change,
            "changePercent24h": change,
        });
        self.broadcaster.broadcast_price_update(symbol, data).await
    }

    async fn legacy_price(&self, symbol: &str, price: f64) -> usize {
        let change = self.record_price(symbol, price);
        let envelope = Envelope::new(
            EventType::LegacyPriceUpdate,
            json!({ "symbol": symbol, "price": price, "change24h": change }),
        );
        self.broadcaster
            .broadcast_where(&envelope, |subs| subs.matches_symbol(symbol))
            .await
    }

    pub(crate) async fn portfolio(&self, portfolio_id: &str, value: f64, change24h: f64) -> usize {
        lock(&self.portfolios).insert(portfolio_id.to_string(), value);
        let data = json!({
            "portfolioId": portfolio_id,
            "totalValue": value,
            "change24h": change24h,
            "changePercent24h": change24h,
        });
        self.broadcaster
            .broadcast_portfolio_update(portfolio_id, data)
            .await
    }

    async fn legacy_portfolio(&self, portfolio_id: &str, value: f64, change24h: f64) -> usize {
        lock(&self.portfolios).insert(portfolio_id.to_string(), value);
        let envelope = Envelope::new(
            EventType::LegacyPortfolioUpdate,
            json!({ "portfolioId": portfolio_id, "value": value, "change24h": change24h }),
        );
        self.broadcaster
            .broadcast_where(&envelope, |subs| subs.matches_portfolio(portfolio_id))
            .await
    }

    pub(crate) async fn alert(&self, severity: &str, message: &str) -> usize {
        let id = self.alert_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let data = json!({
            "alertId": format!("alert-{id}"),
            "severity": severity,
            "message": message,
        });
        self.broadcaster
            .broadcast_custom_message(EventType::AlertRaised, data)
            .await
    }
}

#[derive(Debug)]
struct TrafficTask {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// A running synthetic server bound to a local address.
///
/// Dropping the generator stops accepting new connections and stops
/// background traffic; [`Self::shutdown`] additionally closes every client
/// and waits for the server task.
#[derive(Debug)]
pub struct SyntheticEventGenerator {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    server_token: CancellationToken,
    server: Mutex<Option<JoinHandle<()>>>,
    traffic: Mutex<Option<TrafficTask>>,
}

impl SyntheticEventGenerator {
    /// Binds the server and starts accepting WebSocket clients on `/ws`
    /// and `/ws/{channel}`. Bind to port 0 for an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Io`] if the listener cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, SimulatorError> {
        Self::bind_with(addr, Broadcaster::default()).await
    }

    /// Like [`Self::bind`], fanning out through the given broadcaster.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Io`] if the listener cannot be bound.
    pub async fn bind_with(
        addr: impl ToSocketAddrs,
        broadcaster: Broadcaster,
    ) -> Result<Self, SimulatorError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let app = api::build_router()
            .layer(TraceLayer::new_for_http())
            .with_state(AppState::new(broadcaster.clone()));

        let server_token = CancellationToken::new();
        let shutdown = server_token.clone();
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
            {
                tracing::error!(error = %err, "simulator server failed");
            }
        });
        tracing::info!(addr = %local_addr, "synthetic event generator listening");

        Ok(Self {
            shared: Arc::new(Shared::new(broadcaster)),
            local_addr,
            server_token,
            server: Mutex::new(Some(server)),
            traffic: Mutex::new(None),
        })
    }

    /// Address the server is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL for `channel`, or for `/ws` when `channel` is empty.
    #[must_use]
    pub fn endpoint_url(&self, channel: &str) -> String {
        if channel.is_empty() {
            format!("ws://{}/ws", self.local_addr)
        } else {
            format!("ws://{}/ws/{channel}", self.local_addr)
        }
    }

    /// The broadcaster behind this server.
    #[must_use]
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.shared.broadcaster
    }

    /// Number of connected clients.
    pub async fn client_count(&self) -> usize {
        self.shared.broadcaster.client_count().await
    }

    /// Broadcasts `agentStatusUpdated {agentId, status, updatedAt}`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Encoding`] if the payload cannot be encoded.
    pub async fn simulate_agent_status_update(
        &self,
        agent_id: &str,
        status: &str,
    ) -> Result<usize, SimulatorError> {
        Ok(self.shared.agent_status(agent_id, status).await?)
    }

    /// Broadcasts `taskStarted {taskId, agentId, status: "running", at}`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Encoding`] if the payload cannot be encoded.
    pub async fn simulate_task_started(
        &self,
        task_id: &str,
        agent_id: &str,
    ) -> Result<usize, SimulatorError> {
        Ok(self.shared.task_started(task_id, agent_id).await?)
    }

    /// Broadcasts `taskFinished {taskId, agentId, status, success, at}`.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::Encoding`] if the payload cannot be encoded.
    pub async fn simulate_task_finished(
        &self,
        task_id: &str,
        agent_id: &str,
        success: bool,
    ) -> Result<usize, SimulatorError> {
        Ok(self.shared.task_finished(task_id, agent_id, success).await?)
    }

    /// Sends `priceUpdated` to clients subscribed to `symbol`.
    pub async fn simulate_price_update(&self, symbol: &str, price: f64) -> usize {
        self.shared.price(symbol, price).await
    }

    /// Sends the legacy `price_update` shape to clients subscribed to
    /// `symbol`.
    pub async fn simulate_legacy_price_update(&self, symbol: &str, price: f64) -> usize {
        self.shared.legacy_price(symbol, price).await
    }

    /// Sends `portfolioUpdated` to clients following `portfolio_id`.
    pub async fn simulate_portfolio_update(
        &self,
        portfolio_id: &str,
        value: f64,
        change24h: f64,
    ) -> usize {
        self.shared.portfolio(portfolio_id, value, change24h).await
    }

    /// Sends the legacy `portfolio_update {portfolioId, value, change24h}`
    /// shape to clients following `portfolio_id`.
    pub async fn simulate_legacy_portfolio_update(
        &self,
        portfolio_id: &str,
        value: f64,
        change24h: f64,
    ) -> usize {
        self.shared
            .legacy_portfolio(portfolio_id, value, change24h)
            .await
    }

    /// Broadcasts `alertRaised {alertId, severity, message}`.
    pub async fn simulate_alert(&self, severity: &str, message: &str) -> usize {
        self.shared.alert(severity, message).await
    }

    /// Broadcasts an arbitrary envelope.
    pub async fn simulate_custom(
        &self,
        event_type: impl Into<EventType>,
        data: serde_json::Value,
    ) -> usize {
        self.shared
            .broadcaster
            .broadcast_custom_message(event_type, data)
            .await
    }

    /// Starts background traffic, replacing any traffic already running.
    pub fn start_random_traffic(&self, profile: TrafficProfile) {
        let token = CancellationToken::new();
        let handle = tokio::spawn(traffic::run(
            Arc::clone(&self.shared),
            profile,
            token.clone(),
        ));
        if let Some(previous) = lock(&self.traffic).replace(TrafficTask { token, handle }) {
            previous.token.cancel();
        }
    }

    /// Stops background traffic. Returns `false` if none was running.
    pub fn stop_random_traffic(&self) -> bool {
        match lock(&self.traffic).take() {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether background traffic is running.
    #[must_use]
    pub fn is_generating_traffic(&self) -> bool {
        lock(&self.traffic)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Drops every client without a close handshake, so clients see an
    /// abnormal close and reconnect. The server keeps accepting.
    pub async fn disconnect_all(&self) -> usize {
        self.shared.broadcaster.disconnect_all().await
    }

    /// Sends a Normal close to every client. Clients treat it as a clean
    /// close and do not reconnect.
    pub async fn close_all(&self) -> usize {
        self.shared.broadcaster.close_all().await
    }

    /// Stops traffic, closes every client cleanly and stops the server.
    pub async fn shutdown(&self) {
        self.stop_random_traffic();
        let closed = self.shared.broadcaster.close_all().await;
        self.server_token.cancel();
        let server = lock(&self.server).take();
        if let Some(server) = server
            && tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err()
        {
            tracing::warn!("simulator server did not stop within grace period");
        }
        tracing::info!(addr = %self.local_addr, closed, "synthetic event generator stopped");
    }
}

impl Drop for SyntheticEventGenerator {
    fn drop(&mut self) {
        self.server_token.cancel();
        if let Some(task) = lock(&self.traffic).take() {
            task.token.cancel();
        }
    }
}
