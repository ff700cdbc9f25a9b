//! End-to-end tests: the connection manager against the synthetic event
//! generator on an ephemeral port.

#![allow(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::{Instant, sleep};

use pulse_gateway::client::{ConnectionManager, EndpointState};
use pulse_gateway::config::ClientConfig;
use pulse_gateway::dispatch::EventDispatcher;
use pulse_gateway::protocol::EventType;
use pulse_gateway::simulator::SyntheticEventGenerator;

const WAIT: Duration = Duration::from_secs(5);

type Seen = Arc<Mutex<Vec<Value>>>;

fn fast_config() -> ClientConfig {
    ClientConfig::default()
        .with_reconnect_delays(Duration::from_millis(20), Duration::from_millis(80))
        .with_connection_timeout(Duration::from_secs(2))
        .with_logging(false)
}

async fn simulator() -> SyntheticEventGenerator {
    match SyntheticEventGenerator::bind("127.0.0.1:0").await {
        Ok(sim) => sim,
        Err(err) => panic!("simulator bind failed: {err}"),
    }
}

fn capture(dispatcher: &EventDispatcher, key: &str) -> Seen {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher.on(key, move |data| {
        if let Ok(mut events) = sink.lock() {
            events.push(data.clone());
        }
    });
    seen
}

fn snapshot(seen: &Seen) -> Vec<Value> {
    seen.lock().map(|events| events.clone()).unwrap_or_default()
}

fn count(seen: &Seen) -> usize {
    snapshot(seen).len()
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_clients(sim: &SyntheticEventGenerator, expected: usize) {
    let deadline = Instant::now() + WAIT;
    loop {
        let clients = sim.client_count().await;
        if clients == expected {
            return;
        }
        if Instant::now() > deadline {
            panic!("expected {expected} clients, have {clients}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn connected(manager: &ConnectionManager, name: &str) {
    match manager.connect(name).await {
        Ok(true) => {}
        Ok(false) => panic!("{name} failed to connect"),
        Err(err) => panic!("{name}: {err}"),
    }
}

#[tokio::test]
async fn connect_all_routes_agent_status_to_subscribers() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let plain = capture(&dispatcher, "agentStatusUpdated");
    let scoped = capture(&dispatcher, "agents:agentStatusUpdated");
    let manager = ConnectionManager::new(fast_config(), dispatcher);

    manager.register_endpoint("agents", &sim.endpoint_url("agents"));
    manager.register_endpoint("tasks", &sim.endpoint_url("tasks"));
    assert_eq!(manager.connect_all().await, 2);
    wait_for_clients(&sim, 2).await;

    let delivered = sim
        .simulate_custom(
            EventType::AgentStatusUpdated,
            json!({"agentId": "a1", "status": "active"}),
        )
        .await;
    assert_eq!(delivered, 2);

    // Both endpoints receive it, so the plain key fires twice and the
    // scoped key once.
    eventually("plain delivery", || count(&plain) == 2).await;
    eventually("scoped delivery", || count(&scoped) == 1).await;
    assert_eq!(
        snapshot(&scoped),
        vec![json!({"agentId": "a1", "status": "active"})]
    );

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn structured_agent_and_task_events_arrive() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let agents = capture(&dispatcher, "agentStatusUpdated");
    let started = capture(&dispatcher, "taskStarted");
    let finished = capture(&dispatcher, "taskFinished");
    let manager = ConnectionManager::new(fast_config(), dispatcher);
    manager.register_endpoint("events", &sim.endpoint_url(""));
    connected(&manager, "events").await;
    wait_for_clients(&sim, 1).await;

    assert!(sim.simulate_agent_status_update("a1", "busy").await.is_ok());
    assert!(sim.simulate_task_started("t1", "a1").await.is_ok());
    assert!(sim.simulate_task_finished("t1", "a1", false).await.is_ok());

    eventually("task finished", || count(&finished) == 1).await;
    let agent = snapshot(&agents);
    assert_eq!(agent.first().map(|a| a["status"].clone()), Some(json!("busy")));
    let task = snapshot(&started);
    assert_eq!(task.first().map(|t| t["status"].clone()), Some(json!("running")));
    let done = snapshot(&finished);
    assert_eq!(done.first().map(|t| t["status"].clone()), Some(json!("failed")));
    assert_eq!(done.first().map(|t| t["success"].clone()), Some(json!(false)));

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn reconnects_after_abrupt_server_drop() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let welcomes = capture(&dispatcher, "agents:connected");
    let alerts = capture(&dispatcher, "alertRaised");
    let manager = ConnectionManager::new(fast_config(), dispatcher);
    manager.register_endpoint("agents", &sim.endpoint_url("agents"));

    connected(&manager, "agents").await;
    eventually("first welcome", || count(&welcomes) == 1).await;

    assert_eq!(sim.disconnect_all().await, 1);
    eventually("second welcome", || count(&welcomes) == 2).await;
    assert!(manager.is_endpoint_connected("agents"));
    wait_for_clients(&sim, 1).await;

    assert_eq!(sim.simulate_alert("warning", "disk almost full").await, 1);
    eventually("alert after reconnect", || count(&alerts) == 1).await;

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn explicit_disconnect_never_reconnects() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let welcomes = capture(&dispatcher, "connected");
    let config = fast_config();
    let max_delay = config.max_reconnect_delay;
    let manager = ConnectionManager::new(config, dispatcher);
    manager.register_endpoint("tasks", &sim.endpoint_url("tasks"));

    connected(&manager, "tasks").await;
    eventually("welcome", || count(&welcomes) == 1).await;

    assert!(manager.disconnect_endpoint("tasks").await.is_ok());
    assert_eq!(manager.endpoint_state("tasks"), Some(EndpointState::Disconnected));
    wait_for_clients(&sim, 0).await;

    sleep(max_delay * 4).await;
    assert_eq!(count(&welcomes), 1);
    assert_eq!(manager.endpoint_state("tasks"), Some(EndpointState::Disconnected));
    let status = manager.endpoint_status("tasks");
    assert!(status.is_some_and(|s| !s.reconnect_scheduled));

    // The descriptor survives and can be reopened.
    connected(&manager, "tasks").await;
    eventually("welcome after reopen", || count(&welcomes) == 2).await;

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn stops_after_max_reconnect_attempts() {
    // Bind and drop a listener to get a port nobody is listening on.
    let port = match std::net::TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(err) => panic!("local_addr: {err}"),
        },
        Err(err) => panic!("bind: {err}"),
    };
    let manager = ConnectionManager::new(
        fast_config()
            .with_max_reconnect_attempts(2)
            .with_reconnect_delays(Duration::from_millis(10), Duration::from_millis(20)),
        EventDispatcher::new(),
    );
    manager.register_endpoint("dead", &format!("ws://127.0.0.1:{port}/ws"));

    assert_eq!(manager.connect("dead").await, Ok(false));
    eventually("retries exhausted", || {
        manager
            .endpoint_status("dead")
            .is_some_and(|s| s.reconnect_attempts == 2 && !s.reconnect_scheduled)
    })
    .await;

    sleep(Duration::from_millis(100)).await;
    assert!(!manager.is_endpoint_connected("dead"));
    let status = manager.endpoint_status("dead");
    assert!(status.is_some_and(|s| s.reconnect_attempts == 2 && !s.reconnect_scheduled));

    manager.shutdown().await;
}

#[tokio::test]
async fn rapid_connects_leave_one_socket() {
    let sim = simulator().await;
    let manager = ConnectionManager::new(fast_config(), EventDispatcher::new());
    manager.register_endpoint("agents", &sim.endpoint_url("agents"));

    let attempts = (0..5).map(|_| manager.connect("agents"));
    let results = futures_util::future::join_all(attempts).await;
    assert!(results.iter().all(|r| r.is_ok()));

    assert!(manager.is_endpoint_connected("agents"));
    wait_for_clients(&sim, 1).await;

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn clean_server_close_does_not_reconnect() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let welcomes = capture(&dispatcher, "connected");
    let manager = ConnectionManager::new(fast_config(), dispatcher);
    manager.register_endpoint("agents", &sim.endpoint_url("agents"));

    connected(&manager, "agents").await;
    eventually("welcome", || count(&welcomes) == 1).await;

    assert_eq!(sim.close_all().await, 1);
    eventually("disconnected", || {
        manager.endpoint_state("agents") == Some(EndpointState::Disconnected)
    })
    .await;

    sleep(Duration::from_millis(300)).await;
    assert_eq!(count(&welcomes), 1);
    assert!(!manager.is_endpoint_connected("agents"));

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn price_subscription_filters_ticks() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let acks = capture(&dispatcher, "subscribed");
    let prices = capture(&dispatcher, "prices:priceUpdated");
    let manager = ConnectionManager::new(fast_config(), dispatcher);
    manager.register_endpoint("prices", &sim.endpoint_url("prices"));
    connected(&manager, "prices").await;
    wait_for_clients(&sim, 1).await;

    // Nothing is delivered before subscribing.
    assert_eq!(sim.simulate_price_update("BTC", 100.0).await, 0);

    assert!(manager.send_to_endpoint(
        "prices",
        EventType::SubscribePrices,
        json!({"symbols": ["BTC"]})
    ));
    eventually("subscribe ack", || count(&acks) == 1).await;

    assert_eq!(sim.simulate_price_update("ETH", 10.0).await, 0);
    assert_eq!(sim.simulate_price_update("BTC", 110.0).await, 1);
    eventually("price tick", || count(&prices) == 1).await;

    let tick = snapshot(&prices);
    assert_eq!(tick.first().map(|t| t["symbol"].clone()), Some(json!("BTC")));
    assert_eq!(tick.first().map(|t| t["price"].clone()), Some(json!(110.0)));

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn legacy_updates_are_upgraded_end_to_end() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let acks = capture(&dispatcher, "subscribed");
    let portfolios = capture(&dispatcher, "portfolioUpdated");
    let prices = capture(&dispatcher, "priceUpdated");
    let legacy = capture(&dispatcher, "portfolio_update");
    let manager = ConnectionManager::new(fast_config(), dispatcher);
    manager.register_endpoint("portfolio", &sim.endpoint_url("portfolio"));
    connected(&manager, "portfolio").await;
    wait_for_clients(&sim, 1).await;

    assert!(manager.send_to_endpoint(
        "portfolio",
        EventType::SubscribePortfolio,
        json!({"portfolioId": "p1"})
    ));
    assert!(manager.send_to_endpoint(
        "portfolio",
        EventType::SubscribePrices,
        json!({"symbols": ["*"]})
    ));
    eventually("both acks", || count(&acks) == 2).await;

    assert_eq!(sim.simulate_legacy_portfolio_update("p1", 1_000.0, 2.5).await, 1);
    assert_eq!(sim.simulate_legacy_price_update("SOL", 20.0).await, 1);
    eventually("portfolio update", || count(&portfolios) == 1).await;
    eventually("price update", || count(&prices) == 1).await;

    let update = snapshot(&portfolios);
    let Some(update) = update.first() else {
        panic!("no portfolio update");
    };
    assert_eq!(update["changePercent24h"], json!(2.5));
    assert_eq!(update["totalValue"], json!(1_000.0));
    assert!(snapshot(&legacy).is_empty());

    let tick = snapshot(&prices);
    assert!(tick.first().is_some_and(|t| t.get("changePercent24h").is_some()));

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn heartbeat_records_pong() {
    let sim = simulator().await;
    let manager = ConnectionManager::new(
        fast_config().with_heartbeat_interval(Duration::from_millis(30)),
        EventDispatcher::new(),
    );
    manager.register_endpoint("agents", &sim.endpoint_url("agents"));
    connected(&manager, "agents").await;

    eventually("pong", || {
        manager
            .endpoint_status("agents")
            .is_some_and(|s| s.last_pong_at.is_some())
    })
    .await;

    manager.shutdown().await;
    sim.shutdown().await;
}

#[tokio::test]
async fn random_traffic_reaches_clients() {
    let sim = simulator().await;
    let dispatcher = EventDispatcher::new();
    let agents = capture(&dispatcher, "agentStatusUpdated");
    let manager = ConnectionManager::new(fast_config(), dispatcher);
    manager.register_endpoint("agents", &sim.endpoint_url("agents"));
    connected(&manager, "agents").await;
    wait_for_clients(&sim, 1).await;

    sim.start_random_traffic(
        pulse_gateway::simulator::TrafficProfile::default()
            .with_tick(Duration::from_millis(5))
            .with_task_duration(Duration::from_millis(1), Duration::from_millis(5)),
    );
    eventually("status flips", || count(&agents) >= 3).await;
    assert!(sim.stop_random_traffic());

    manager.shutdown().await;
    sim.shutdown().await;
}
