//! Configuration for the broadcaster server, the client connection
//! manager and the synthetic event generator.
//!
//! Follows 12-factor style: every setting has a default and may be
//! overridden by an environment variable (or a `.env` file via `dotenvy`).
//! Library users may also build the structs directly.

use std::net::SocketAddr;
use std::time::Duration;

use crate::simulator::TrafficProfile;

/// Server-side configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP/WebSocket server to.
    pub listen_addr: SocketAddr,

    /// Capacity of each client's outbound frame queue.
    pub client_queue_capacity: usize,
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse()?;

        Ok(Self {
            listen_addr,
            client_queue_capacity: parse_env("CLIENT_QUEUE_CAPACITY", DEFAULT_CLIENT_QUEUE),
        })
    }
}

/// Default per-client outbound queue capacity.
pub const DEFAULT_CLIENT_QUEUE: usize = 256;

/// Synthetic event generator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Socket address to bind the generator to.
    pub listen_addr: SocketAddr,
    /// Emit background traffic on startup.
    pub random_traffic: bool,
    /// Background traffic mix.
    pub traffic: TrafficProfile,
}

impl SimulatorConfig {
    /// Loads `SIM_LISTEN_ADDR` (default `127.0.0.1:8081`),
    /// `SIM_RANDOM_TRAFFIC` (default `true`) and the traffic keys read by
    /// [`TrafficProfile::from_env`].
    ///
    /// # Errors
    ///
    /// Returns an error if `SIM_LISTEN_ADDR` is set but cannot be parsed
    /// as a [`SocketAddr`].
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("SIM_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8081".to_string())
            .parse()?;

        Ok(Self {
            listen_addr,
            random_traffic: parse_env_bool("SIM_RANDOM_TRAFFIC", true),
            traffic: TrafficProfile::from_env(),
        })
    }
}

/// Client connection manager configuration.
///
/// All durations default to the values documented on each field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Consecutive failed attempts after which automatic reconnection
    /// stops (default 10).
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt (default 1s).
    pub base_reconnect_delay: Duration,
    /// Upper bound on the unjittered reconnect delay (default 30s).
    pub max_reconnect_delay: Duration,
    /// Interval between `ping` envelopes while connected (default 30s).
    pub heartbeat_interval: Duration,
    /// Bound on a single connection handshake (default 10s).
    pub connection_timeout: Duration,
    /// Emit lifecycle info/debug logs (default `true`).
    pub enable_logging: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            base_reconnect_delay: Duration::from_millis(1_000),
            max_reconnect_delay: Duration::from_millis(30_000),
            heartbeat_interval: Duration::from_millis(30_000),
            connection_timeout: Duration::from_millis(10_000),
            enable_logging: true,
        }
    }
}

impl ClientConfig {
    /// Loads overrides from `PULSE_*` environment variables on top of the
    /// defaults.
    ///
    /// Recognized keys: `PULSE_MAX_RECONNECT_ATTEMPTS`,
    /// `PULSE_BASE_RECONNECT_DELAY_MS`, `PULSE_MAX_RECONNECT_DELAY_MS`,
    /// `PULSE_HEARTBEAT_INTERVAL_MS`, `PULSE_CONNECTION_TIMEOUT_MS`,
    /// `PULSE_ENABLE_LOGGING`. Invalid values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            max_reconnect_attempts: parse_env(
                "PULSE_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            base_reconnect_delay: parse_env_ms(
                "PULSE_BASE_RECONNECT_DELAY_MS",
                defaults.base_reconnect_delay,
            ),
            max_reconnect_delay: parse_env_ms(
                "PULSE_MAX_RECONNECT_DELAY_MS",
                defaults.max_reconnect_delay,
            ),
            heartbeat_interval: parse_env_ms(
                "PULSE_HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval,
            ),
            connection_timeout: parse_env_ms(
                "PULSE_CONNECTION_TIMEOUT_MS",
                defaults.connection_timeout,
            ),
            enable_logging: parse_env_bool("PULSE_ENABLE_LOGGING", defaults.enable_logging),
        }
    }

    /// Sets [`Self::max_reconnect_attempts`].
    #[must_use]
    pub const fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Sets the base and maximum reconnect delays.
    #[must_use]
    pub const fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_reconnect_delay = base;
        self.max_reconnect_delay = max;
        self
    }

    /// Sets [`Self::heartbeat_interval`].
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets [`Self::connection_timeout`].
    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets [`Self::enable_logging`].
    #[must_use]
    pub const fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
pub(crate) fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable holding milliseconds.
pub(crate) fn parse_env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
pub(crate) fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
