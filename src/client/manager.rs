//! Multiplexed connection manager.
//!
//! [`ConnectionManager`] owns a set of named endpoints, each an independent
//! WebSocket with its own reconnect schedule and heartbeat. Inbound frames
//! are parsed, upgraded from legacy formats, and emitted into the injected
//! [`EventDispatcher`] under both the plain type and the endpoint-scoped
//! key `"{endpoint}:{type}"`.
//!
//! ```text
//!  connect ──► Connecting ──open──► Connected ──clean close──► Disconnected
//!                 │                     │
//!           error/timeout          unclean close
//!                 ▼                     ▼
//!            Disconnected ──backoff──► Connecting   (until max attempts)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use super::backoff::ReconnectPolicy;
use super::endpoint::{Endpoint, EndpointState, EndpointStatus, Link, OwnedTask, Session};
use crate::config::ClientConfig;
use crate::dispatch::{EventDispatcher, scoped_key};
use crate::error::ClientError;
use crate::protocol::{Envelope, EventType, compat};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long a closing session may take to flush its close frame.
const SESSION_CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    policy: ReconnectPolicy,
    dispatcher: EventDispatcher,
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    initialized: AtomicBool,
}

/// Client-side manager of several independent WebSocket endpoints.
///
/// Construct one per process and pass clones to consumers; all clones
/// share the same endpoints. Background tasks hold only weak references,
/// so dropping every clone stops automatic reconnection.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager emitting into `dispatcher`.
    #[must_use]
    pub fn new(config: ClientConfig, dispatcher: EventDispatcher) -> Self {
        let policy = ReconnectPolicy::from(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                policy,
                dispatcher,
                endpoints: RwLock::new(HashMap::new()),
                initialized: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the configuration this manager was built with.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the dispatcher inbound events are emitted into.
    #[must_use]
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.inner.dispatcher
    }

    /// Registers endpoints and connects them, once per lifecycle.
    ///
    /// Returns `false` without doing anything if the manager is already
    /// initialized; [`shutdown`](Self::shutdown) re-arms it.
    pub async fn initialize<I, N, U>(&self, endpoints: I) -> bool
    where
        I: IntoIterator<Item = (N, U)>,
        N: AsRef<str>,
        U: AsRef<str>,
    {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            self.log_debug("initialize called twice; ignoring");
            return false;
        }
        for (name, url) in endpoints {
            self.register_endpoint(name.as_ref(), url.as_ref());
        }
        let connected = self.connect_all().await;
        if self.inner.config.enable_logging {
            tracing::info!(connected, "connection manager initialized");
        }
        true
    }

    /// Disconnects every endpoint and allows [`initialize`](Self::initialize)
    /// to run again.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.inner.initialized.store(false, Ordering::SeqCst);
    }

    /// Returns `true` between [`initialize`](Self::initialize) and
    /// [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    /// Adds an endpoint in the `Disconnected` state.
    ///
    /// Returns `false` (and changes nothing) if `name` is already registered.
    pub fn register_endpoint(&self, name: &str, url: &str) -> bool {
        let mut endpoints = self
            .inner
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if endpoints.contains_key(name) {
            return false;
        }
        endpoints.insert(name.to_string(), Arc::new(Endpoint::new(name, url)));
        drop(endpoints);
        if self.inner.config.enable_logging {
            tracing::debug!(endpoint = name, url, "endpoint registered");
        }
        true
    }

    /// Disconnects and forgets an endpoint. Returns `false` if unknown.
    pub async fn remove_endpoint(&self, name: &str) -> bool {
        let Some(endpoint) = self.endpoint(name) else {
            return false;
        };
        self.teardown(&endpoint).await;
        self.inner
            .endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Opens (or re-opens) the named endpoint.
    ///
    /// Any prior socket is closed cleanly first and a pending reconnect is
    /// cancelled. The handshake is bounded by the connection timeout.
    /// Returns `Ok(true)` once connected, `Ok(false)` if the attempt
    /// failed (a reconnect is then scheduled while attempts remain).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownEndpoint`] if `name` is not registered.
    pub async fn connect(&self, name: &str) -> Result<bool, ClientError> {
        let endpoint = self
            .endpoint(name)
            .ok_or_else(|| ClientError::UnknownEndpoint(name.to_string()))?;
        Ok(self.open(endpoint, None).await)
    }

    /// Connects every registered endpoint concurrently.
    ///
    /// Resolves once every attempt has settled and returns how many
    /// endpoints are connected. Failures are retried per endpoint.
    pub async fn connect_all(&self) -> usize {
        let attempts = self
            .endpoints()
            .into_iter()
            .map(|endpoint| self.open(endpoint, None));
        futures_util::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|connected| *connected)
            .count()
    }

    /// Cleanly closes one endpoint without scheduling a reconnect.
    ///
    /// The endpoint stays registered and can be reopened with
    /// [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::UnknownEndpoint`] if `name` is not registered.
    pub async fn disconnect_endpoint(&self, name: &str) -> Result<(), ClientError> {
        let endpoint = self
            .endpoint(name)
            .ok_or_else(|| ClientError::UnknownEndpoint(name.to_string()))?;
        self.teardown(&endpoint).await;
        Ok(())
    }

    /// Cleanly closes every endpoint.
    pub async fn disconnect(&self) {
        let endpoints = self.endpoints();
        futures_util::future::join_all(endpoints.iter().map(|ep| self.teardown(ep))).await;
    }

    /// Sends an envelope on one endpoint if it is connected.
    ///
    /// Fire-and-forget: returns `false` when the endpoint is unknown, not
    /// connected, or its writer has gone away. Nothing is queued for later.
    pub fn send_to_endpoint(
        &self,
        name: &str,
        event_type: impl Into<EventType>,
        data: serde_json::Value,
    ) -> bool {
        let Some(endpoint) = self.endpoint(name) else {
            return false;
        };
        match Envelope::new(event_type, data).to_text() {
            Ok(text) => endpoint.send(Message::text(text)),
            Err(err) => {
                tracing::warn!(endpoint = name, error = %err, "failed to encode envelope");
                false
            }
        }
    }

    /// Sends the same envelope on every endpoint.
    ///
    /// Returns the number of endpoints that accepted the frame.
    pub fn broadcast(&self, event_type: impl Into<EventType>, data: serde_json::Value) -> usize {
        let text = match Envelope::new(event_type, data).to_text() {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "failed to encode envelope");
                return 0;
            }
        };
        self.endpoints()
            .iter()
            .filter(|endpoint| endpoint.send(Message::text(text.clone())))
            .count()
    }

    /// Returns `true` if the named endpoint is connected.
    #[must_use]
    pub fn is_endpoint_connected(&self, name: &str) -> bool {
        self.endpoint_state(name) == Some(EndpointState::Connected)
    }

    /// Returns the current state of the named endpoint.
    #[must_use]
    pub fn endpoint_state(&self, name: &str) -> Option<EndpointState> {
        self.endpoint(name).map(|endpoint| endpoint.state())
    }

    /// Returns a receiver that observes every state transition of the
    /// named endpoint.
    #[must_use]
    pub fn watch_endpoint(&self, name: &str) -> Option<watch::Receiver<EndpointState>> {
        self.endpoint(name).map(|endpoint| endpoint.state.subscribe())
    }

    /// Returns a snapshot of the named endpoint.
    #[must_use]
    pub fn endpoint_status(&self, name: &str) -> Option<EndpointStatus> {
        self.endpoint(name).map(|endpoint| endpoint.status())
    }

    /// Returns snapshots of every endpoint, ordered by name.
    #[must_use]
    pub fn status(&self) -> Vec<EndpointStatus> {
        let mut all: Vec<EndpointStatus> = self.endpoints().iter().map(|ep| ep.status()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Returns the registered endpoint names, sorted.
    #[must_use]
    pub fn endpoint_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    fn endpoint(&self, name: &str) -> Option<Arc<Endpoint>> {
        self.inner
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.inner
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// One connection attempt. `retry` is the token of the reconnect task
    /// driving this attempt, or `None` for an explicit call.
    async fn open(&self, endpoint: Arc<Endpoint>, retry: Option<CancellationToken>) -> bool {
        let mut lifecycle = endpoint.lifecycle.lock().await;

        if retry.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return false;
        }
        match (endpoint.take_reconnect(), &retry) {
            // The reconnect task driving this attempt; it is finishing now.
            (Some(_own), Some(_)) => {}
            (Some(pending), None) => pending.cancel(),
            (None, _) => {}
        }

        if let Some(session) = lifecycle.session.take() {
            session.close(SESSION_CLOSE_GRACE).await;
        }
        *endpoint.link() = None;

        lifecycle.generation += 1;
        let generation = lifecycle.generation;
        endpoint.set_state(EndpointState::Connecting);
        if self.inner.config.enable_logging {
            tracing::debug!(
                endpoint = %endpoint.name,
                url = %endpoint.url,
                attempt = endpoint.attempts(),
                "connecting"
            );
        }

        let outcome = tokio::time::timeout(
            self.inner.config.connection_timeout,
            connect_async(endpoint.url.as_str()),
        )
        .await;

        match outcome {
            Ok(Ok((socket, _response))) => {
                lifecycle.session = Some(self.start_session(&endpoint, generation, socket));
                endpoint.attempts.store(0, Ordering::SeqCst);
                endpoint.set_state(EndpointState::Connected);
                if self.inner.config.enable_logging {
                    tracing::info!(endpoint = %endpoint.name, "endpoint connected");
                }
                true
            }
            Ok(Err(err)) => {
                tracing::warn!(endpoint = %endpoint.name, error = %err, "connection failed");
                endpoint.set_state(EndpointState::Disconnected);
                self.schedule_reconnect(&endpoint);
                false
            }
            Err(_elapsed) => {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    timeout_ms = self.inner.config.connection_timeout.as_millis(),
                    "connection timed out"
                );
                endpoint.set_state(EndpointState::Disconnected);
                self.schedule_reconnect(&endpoint);
                false
            }
        }
    }

    /// Spawns the writer, reader and heartbeat tasks for a fresh socket.
    fn start_session(&self, endpoint: &Arc<Endpoint>, generation: u64, socket: Socket) -> Session {
        let (sink, stream) = socket.split();
        let (outbound, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        *endpoint.link() = Some(Link {
            generation,
            outbound: outbound.clone(),
        });

        let writer = tokio::spawn(write_loop(sink, rx, token.clone()));
        let heartbeat = tokio::spawn(heartbeat_loop(
            outbound,
            self.inner.config.heartbeat_interval,
            token.clone(),
        ));
        tokio::spawn(read_loop(
            Arc::downgrade(&self.inner),
            Arc::clone(endpoint),
            stream,
            generation,
            token.clone(),
        ));

        Session {
            token,
            writer,
            heartbeat,
        }
    }

    /// Handles the end of a session's inbound stream.
    async fn on_session_closed(&self, endpoint: Arc<Endpoint>, generation: u64, clean: bool) {
        let mut lifecycle = endpoint.lifecycle.lock().await;
        if lifecycle.generation != generation || lifecycle.session.is_none() {
            return;
        }
        if let Some(session) = lifecycle.session.take() {
            session.close(SESSION_CLOSE_GRACE).await;
        }
        {
            let mut link = endpoint.link();
            if link.as_ref().is_some_and(|l| l.generation == generation) {
                *link = None;
            }
        }
        endpoint.set_state(EndpointState::Disconnected);

        if clean {
            if self.inner.config.enable_logging {
                tracing::info!(endpoint = %endpoint.name, "endpoint closed by remote");
            }
            return;
        }
        tracing::warn!(endpoint = %endpoint.name, "connection lost");
        self.schedule_reconnect(&endpoint);
    }

    /// Schedules the next automatic attempt, unless attempts are exhausted.
    fn schedule_reconnect(&self, endpoint: &Arc<Endpoint>) {
        let attempts = endpoint.attempts();
        if !self.inner.policy.allows(attempts) {
            tracing::warn!(
                endpoint = %endpoint.name,
                attempts,
                "max reconnect attempts reached; staying disconnected"
            );
            return;
        }

        let attempt = attempts + 1;
        endpoint.attempts.store(attempt, Ordering::SeqCst);
        let delay = self.inner.policy.next_delay(attempt);
        if self.inner.config.enable_logging {
            tracing::info!(
                endpoint = %endpoint.name,
                attempt,
                delay_ms = delay.as_millis(),
                "reconnect scheduled"
            );
        }

        let token = CancellationToken::new();
        let weak = Arc::downgrade(&self.inner);
        let target = Arc::clone(endpoint);
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = task_token.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            if let Some(inner) = weak.upgrade() {
                ConnectionManager { inner }.open(target, Some(task_token)).await;
            }
        });
        endpoint.set_reconnect(OwnedTask { token, handle });
    }

    /// Cancels timers, closes the socket cleanly and marks the endpoint
    /// disconnected.
    async fn teardown(&self, endpoint: &Arc<Endpoint>) {
        endpoint.cancel_reconnect();
        let mut lifecycle = endpoint.lifecycle.lock().await;
        // A failed attempt may have scheduled a retry while we waited.
        endpoint.cancel_reconnect();
        if let Some(session) = lifecycle.session.take() {
            session.close(SESSION_CLOSE_GRACE).await;
        }
        *endpoint.link() = None;
        endpoint.set_state(EndpointState::Disconnected);
        if self.inner.config.enable_logging {
            tracing::info!(endpoint = %endpoint.name, "endpoint disconnected");
        }
    }

    fn log_debug(&self, message: &str) {
        if self.inner.config.enable_logging {
            tracing::debug!("{message}");
        }
    }
}

/// Drains queued frames into the socket; on cancellation sends a Normal
/// close frame so the remote sees a clean close.
async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "client disconnect".into(),
                }));
                let _ = sink.send(close).await;
                let _ = sink.close().await;
                break;
            }
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(err) = sink.send(frame).await {
                    tracing::debug!(error = %err, "socket write failed");
                    break;
                }
            }
        }
    }
}

/// Sends a `ping` envelope every `every` until cancelled. A zero interval
/// disables the heartbeat.
async fn heartbeat_loop(
    outbound: mpsc::UnboundedSender<Message>,
    every: Duration,
    token: CancellationToken,
) {
    if every.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                let Ok(text) = Envelope::ping().to_text() else { continue };
                if outbound.send(Message::text(text)).is_err() {
                    break;
                }
            }
        }
    }
}

/// Reads frames in receipt order and routes them until the stream ends or
/// the session is cancelled.
async fn read_loop(
    manager: Weak<Inner>,
    endpoint: Arc<Endpoint>,
    mut stream: SplitStream<Socket>,
    generation: u64,
    token: CancellationToken,
) {
    let Some((dispatcher, log)) = manager
        .upgrade()
        .map(|inner| (inner.dispatcher.clone(), inner.config.enable_logging))
    else {
        return;
    };

    let clean = loop {
        let frame = tokio::select! {
            () = token.cancelled() => return,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => route(&endpoint, &dispatcher, text.as_str()),
            Some(Ok(Message::Close(frame))) => {
                if log {
                    tracing::debug!(endpoint = %endpoint.name, ?frame, "close frame received");
                }
                break frame.is_some_and(|f| f.code == CloseCode::Normal);
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                tracing::debug!(endpoint = %endpoint.name, error = %err, "socket read failed");
                break false;
            }
            None => break false,
        }
    };

    if token.is_cancelled() {
        return;
    }
    if let Some(inner) = manager.upgrade() {
        ConnectionManager { inner }
            .on_session_closed(endpoint, generation, clean)
            .await;
    }
}

/// Parses one inbound frame and hands it to the dispatcher.
fn route(endpoint: &Endpoint, dispatcher: &EventDispatcher, text: &str) {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(endpoint = %endpoint.name, error = %err, "dropping malformed frame");
            return;
        }
    };

    if envelope.event_type == EventType::Pong {
        endpoint.record_pong();
        return;
    }

    let envelope = compat::upgrade(envelope);
    let event_type = envelope.event_type.as_str();
    dispatcher.emit(event_type, &envelope.data);
    dispatcher.emit(scoped_key(&endpoint.name, event_type), &envelope.data);
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn quiet() -> ClientConfig {
        ClientConfig::default().with_logging(false)
    }

    fn capture(dispatcher: &EventDispatcher, key: &str) -> Arc<Mutex<Vec<serde_json::Value>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.on(key, move |data| {
            if let Ok(mut v) = sink.lock() {
                v.push(data.clone());
            }
        });
        seen
    }

    fn taken(seen: &Arc<Mutex<Vec<serde_json::Value>>>) -> Vec<serde_json::Value> {
        seen.lock().map(|v| v.clone()).unwrap_or_default()
    }

    #[test]
    fn register_is_idempotent() {
        let manager = ConnectionManager::new(quiet(), EventDispatcher::new());
        assert!(manager.register_endpoint("agents", "ws://127.0.0.1:1/agents"));
        assert!(!manager.register_endpoint("agents", "ws://127.0.0.1:2/other"));
        let status = manager.endpoint_status("agents");
        let Some(status) = status else {
            panic!("endpoint missing");
        };
        assert_eq!(status.url, "ws://127.0.0.1:1/agents");
        assert_eq!(status.state, EndpointState::Disconnected);
    }

    #[tokio::test]
    async fn connect_unknown_endpoint_fails_fast() {
        let manager = ConnectionManager::new(quiet(), EventDispatcher::new());
        let result = manager.connect("missing").await;
        assert_eq!(result, Err(ClientError::UnknownEndpoint("missing".to_string())));
    }

    #[test]
    fn send_on_disconnected_endpoint_returns_false() {
        let manager = ConnectionManager::new(quiet(), EventDispatcher::new());
        manager.register_endpoint("tasks", "ws://127.0.0.1:1/tasks");
        assert!(!manager.send_to_endpoint("tasks", EventType::Ping, json!(null)));
        assert!(!manager.send_to_endpoint("unknown", EventType::Ping, json!(null)));
        assert_eq!(manager.broadcast(EventType::Ping, json!(null)), 0);
    }

    #[test]
    fn route_emits_plain_and_scoped_keys() {
        let dispatcher = EventDispatcher::new();
        let plain = capture(&dispatcher, "taskStarted");
        let scoped = capture(&dispatcher, "tasks:taskStarted");
        let endpoint = Endpoint::new("tasks", "ws://127.0.0.1:1/tasks");

        route(
            &endpoint,
            &dispatcher,
            r#"{"type":"taskStarted","data":{"taskId":"t1"},"timestamp":"2024-01-01T00:00:00Z"}"#,
        );

        assert_eq!(taken(&plain), vec![json!({"taskId": "t1"})]);
        assert_eq!(taken(&scoped), vec![json!({"taskId": "t1"})]);
    }

    #[test]
    fn route_consumes_pong() {
        let dispatcher = EventDispatcher::new();
        let seen = capture(&dispatcher, "pong");
        let endpoint = Endpoint::new("agents", "ws://127.0.0.1:1/agents");

        route(&endpoint, &dispatcher, r#"{"type":"pong"}"#);

        assert!(taken(&seen).is_empty());
        assert!(endpoint.last_pong().is_some());
    }

    #[test]
    fn route_drops_malformed_frames() {
        let dispatcher = EventDispatcher::new();
        let seen = capture(&dispatcher, "taskStarted");
        let endpoint = Endpoint::new("tasks", "ws://127.0.0.1:1/tasks");

        route(&endpoint, &dispatcher, "{not json");
        route(&endpoint, &dispatcher, r#"{"data":{}}"#);

        assert!(taken(&seen).is_empty());
    }

    #[test]
    fn route_upgrades_legacy_portfolio_update() {
        let dispatcher = EventDispatcher::new();
        let seen = capture(&dispatcher, "portfolioUpdated");
        let legacy = capture(&dispatcher, "portfolio_update");
        let endpoint = Endpoint::new("portfolio", "ws://127.0.0.1:1/portfolio");

        route(
            &endpoint,
            &dispatcher,
            r#"{"type":"portfolio_update","data":{"portfolioId":"p1","change24h":-1.5}}"#,
        );

        let got = taken(&seen);
        assert_eq!(got.len(), 1);
        assert_eq!(got.first().map(|d| d["changePercent24h"].clone()), Some(json!(-1.5)));
        assert!(taken(&legacy).is_empty());
    }

    #[tokio::test]
    async fn initialize_runs_once_until_shutdown() {
        let manager = ConnectionManager::new(
            quiet().with_max_reconnect_attempts(0),
            EventDispatcher::new(),
        );
        let unreachable = [("agents", "ws://127.0.0.1:1/agents")];

        assert!(manager.initialize(unreachable).await);
        assert!(manager.is_initialized());
        assert!(!manager.initialize([("tasks", "ws://127.0.0.1:1/tasks")]).await);
        assert_eq!(manager.endpoint_names(), vec!["agents".to_string()]);

        manager.shutdown().await;
        assert!(!manager.is_initialized());
        assert!(manager.initialize([("tasks", "ws://127.0.0.1:1/tasks")]).await);
        assert_eq!(
            manager.endpoint_names(),
            vec!["agents".to_string(), "tasks".to_string()]
        );
    }

    #[tokio::test]
    async fn stalled_handshake_times_out_and_schedules_retry() {
        // Accepts TCP through the backlog but never answers the upgrade.
        let listener = match tokio::net::TcpListener::bind("127.0.0.1:0").await {
            Ok(listener) => listener,
            Err(err) => panic!("bind failed: {err}"),
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => panic!("no local addr: {err}"),
        };
        let timeout = Duration::from_millis(200);
        let manager = ConnectionManager::new(
            quiet()
                .with_connection_timeout(timeout)
                .with_reconnect_delays(Duration::from_secs(60), Duration::from_secs(60)),
            EventDispatcher::new(),
        );
        manager.register_endpoint("tasks", &format!("ws://{addr}/ws/tasks"));

        let started = std::time::Instant::now();
        assert_eq!(manager.connect("tasks").await, Ok(false));
        let elapsed = started.elapsed();
        assert!(elapsed >= timeout, "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");

        let Some(status) = manager.endpoint_status("tasks") else {
            panic!("endpoint missing");
        };
        assert_eq!(status.state, EndpointState::Disconnected);
        assert_eq!(status.reconnect_attempts, 1);
        assert!(status.reconnect_scheduled);

        manager.disconnect().await;
        assert_eq!(
            manager.endpoint_status("tasks").map(|s| s.reconnect_scheduled),
            Some(false)
        );
        drop(listener);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_for_their_backoff_delay() {
        let config = quiet()
            .with_reconnect_delays(Duration::from_secs(1), Duration::from_secs(30))
            .with_connection_timeout(Duration::from_secs(5))
            .with_max_reconnect_attempts(3);
        let policy = ReconnectPolicy::from(&config);
        let manager = ConnectionManager::new(config, EventDispatcher::new());
        manager.register_endpoint("agents", "ws://127.0.0.1:1/agents");
        let Some(mut state) = manager.watch_endpoint("agents") else {
            panic!("endpoint missing");
        };

        assert_eq!(manager.connect("agents").await, Ok(false));
        for attempt in 1..=3 {
            assert!(state.wait_for(|s| *s == EndpointState::Disconnected).await.is_ok());
            assert_eq!(manager.endpoint_status("agents").map(|s| s.reconnect_attempts), Some(attempt));
            let failed_at = tokio::time::Instant::now();

            assert!(state.wait_for(|s| *s == EndpointState::Connecting).await.is_ok());
            let waited = failed_at.elapsed();
            let base = policy.base_delay(attempt);
            assert!(waited >= base, "attempt {attempt} retried after {waited:?}");
            // Jitter adds under a tenth; timers round up to the millisecond.
            let latest = base + base / 10 + Duration::from_millis(2);
            assert!(waited <= latest, "attempt {attempt} retried after {waited:?}");
        }

        assert!(state.wait_for(|s| *s == EndpointState::Disconnected).await.is_ok());
        let Some(status) = manager.endpoint_status("agents") else {
            panic!("endpoint missing");
        };
        assert_eq!(status.reconnect_attempts, 3);
        assert!(!status.reconnect_scheduled);
    }

    #[tokio::test]
    async fn remove_endpoint_forgets_descriptor() {
        let manager = ConnectionManager::new(quiet(), EventDispatcher::new());
        manager.register_endpoint("agents", "ws://127.0.0.1:1/agents");
        assert!(manager.remove_endpoint("agents").await);
        assert!(!manager.remove_endpoint("agents").await);
        assert!(manager.endpoint_state("agents").is_none());
    }
}
