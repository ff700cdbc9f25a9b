//! Randomized background traffic for the synthetic event generator.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio_util::sync::CancellationToken;

use super::Shared;
use crate::config::{parse_env, parse_env_ms};

const AGENT_STATUSES: &[&str] = &["idle", "active", "busy", "offline"];
const ALERT_SEVERITIES: &[&str] = &["info", "warning", "critical"];

/// Shape of the background event mix.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficProfile {
    /// Interval between ticks; each tick emits one event.
    pub tick: Duration,
    /// Agent ids whose status flips.
    pub agents: Vec<String>,
    /// Symbols whose prices tick.
    pub symbols: Vec<String>,
    /// Portfolio ids whose valuation changes.
    pub portfolios: Vec<String>,
    /// Lower bound of the delay between a task's start and finish.
    pub min_task_duration: Duration,
    /// Upper bound of the delay between a task's start and finish.
    pub max_task_duration: Duration,
    /// Probability that a tick also raises an alert.
    pub alert_probability: f64,
}

impl Default for TrafficProfile {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1_000),
            agents: vec!["agent-1".into(), "agent-2".into(), "agent-3".into()],
            symbols: vec!["BTC".into(), "ETH".into(), "SOL".into()],
            portfolios: vec!["portfolio-1".into()],
            min_task_duration: Duration::from_millis(500),
            max_task_duration: Duration::from_millis(3_000),
            alert_probability: 0.05,
        }
    }
}

impl TrafficProfile {
    /// Loads `SIM_TICK_MS`, `SIM_AGENTS`, `SIM_SYMBOLS` and
    /// `SIM_PORTFOLIOS` (comma-separated lists) over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick: parse_env_ms("SIM_TICK_MS", defaults.tick),
            agents: parse_list("SIM_AGENTS").unwrap_or(defaults.agents),
            symbols: parse_list("SIM_SYMBOLS").unwrap_or(defaults.symbols),
            portfolios: parse_list("SIM_PORTFOLIOS").unwrap_or(defaults.portfolios),
            alert_probability: parse_env("SIM_ALERT_PROBABILITY", defaults.alert_probability),
            ..defaults
        }
    }

    /// Sets [`Self::tick`].
    #[must_use]
    pub const fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Sets the task duration bounds.
    #[must_use]
    pub const fn with_task_duration(mut self, min: Duration, max: Duration) -> Self {
        self.min_task_duration = min;
        self.max_task_duration = max;
        self
    }

    /// Sets [`Self::alert_probability`].
    #[must_use]
    pub const fn with_alert_probability(mut self, probability: f64) -> Self {
        self.alert_probability = probability;
        self
    }
}

fn parse_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    (!items.is_empty()).then_some(items)
}

/// One step of background traffic, chosen before any await so the
/// thread-local RNG is never held across a suspension point.
#[derive(Debug, Clone, PartialEq)]
enum Step {
    AgentStatus { agent_id: String, status: &'static str },
    Price { symbol: String, drift: f64 },
    Portfolio { portfolio_id: String, drift: f64 },
    Task { agent_id: String, duration: Duration, success: bool },
    Idle,
}

fn pick_step(profile: &TrafficProfile, rng: &mut impl Rng) -> Step {
    let roll: f64 = rng.gen_range(0.0..1.0);
    if roll < 0.3 {
        if let (Some(agent), Some(status)) =
            (profile.agents.choose(rng), AGENT_STATUSES.choose(rng).copied())
        {
            return Step::AgentStatus {
                agent_id: agent.clone(),
                status,
            };
        }
    } else if roll < 0.65 {
        if let Some(symbol) = profile.symbols.choose(rng) {
            return Step::Price {
                symbol: symbol.clone(),
                drift: rng.gen_range(-0.02..0.02),
            };
        }
    } else if roll < 0.8 {
        if let Some(portfolio) = profile.portfolios.choose(rng) {
            return Step::Portfolio {
                portfolio_id: portfolio.clone(),
                drift: rng.gen_range(-0.01..0.01),
            };
        }
    } else if let Some(agent) = profile.agents.choose(rng) {
        let min = profile.min_task_duration.as_millis();
        let max = profile.max_task_duration.as_millis().max(min);
        let millis = u64::try_from(rng.gen_range(min..=max)).unwrap_or(u64::MAX);
        return Step::Task {
            agent_id: agent.clone(),
            duration: Duration::from_millis(millis),
            success: rng.gen_bool(0.9),
        };
    }
    Step::Idle
}

fn pick_alert(profile: &TrafficProfile, rng: &mut impl Rng) -> Option<&'static str> {
    let p = profile.alert_probability;
    if p.is_finite() && rng.gen_bool(p.clamp(0.0, 1.0)) {
        ALERT_SEVERITIES.choose(rng).copied()
    } else {
        None
    }
}

/// Emits one event per tick until `token` is cancelled.
///
/// Task start/finish pairs run on child tasks tied to the same token, so
/// stopping traffic also drops every pending `taskFinished`.
pub(crate) async fn run(shared: Arc<Shared>, profile: TrafficProfile, token: CancellationToken) {
    let mut ticker = tokio::time::interval(profile.tick.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(tick_ms = profile.tick.as_millis(), "random traffic started");

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let (step, alert) = {
            let mut rng = rand::thread_rng();
            (pick_step(&profile, &mut rng), pick_alert(&profile, &mut rng))
        };

        match step {
            Step::AgentStatus { agent_id, status } => {
                if let Err(err) = shared.agent_status(&agent_id, status).await {
                    tracing::warn!(error = %err, "agent status tick failed");
                }
            }
            Step::Price { symbol, drift } => {
                let price = shared.drift_price(&symbol, drift);
                shared.price(&symbol, price).await;
            }
            Step::Portfolio { portfolio_id, drift } => {
                let value = shared.drift_portfolio(&portfolio_id, drift);
                shared.portfolio(&portfolio_id, value, drift * 100.0).await;
            }
            Step::Task { agent_id, duration, success } => {
                let shared = Arc::clone(&shared);
                let token = token.child_token();
                tokio::spawn(async move {
                    let task_id = shared.next_task_id();
                    if let Err(err) = shared.task_started(&task_id, &agent_id).await {
                        tracing::warn!(error = %err, "task start tick failed");
                        return;
                    }
                    tokio::select! {
                        () = token.cancelled() => {}
                        () = tokio::time::sleep(duration) => {
                            if let Err(err) = shared.task_finished(&task_id, &agent_id, success).await {
                                tracing::warn!(error = %err, "task finish tick failed");
                            }
                        }
                    }
                });
            }
            Step::Idle => {}
        }

        if let Some(severity) = alert {
            shared.alert(severity, "synthetic alert").await;
        }
    }

    tracing::info!("random traffic stopped");
}
