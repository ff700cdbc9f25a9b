//! Client-originated control payloads.
//!
//! These are interpreted only by the server side; the client connection
//! manager sends them like any other envelope.

use serde::{Deserialize, Serialize};

/// Payload of `subscribe_prices` and `unsubscribe_prices`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSubscription {
    /// Symbols to add or remove. An empty list on unsubscribe removes all.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Payload of `subscribe_portfolio`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSubscription {
    /// Portfolio to follow.
    pub portfolio_id: String,
}

/// Payload of the unicast `connected` welcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    /// Server-assigned client identifier.
    pub client_id: String,
    /// Channel segment of the upgrade path, if any.
    pub channel: Option<String>,
    /// Human-readable greeting.
    pub message: String,
}

/// Payload of an `error` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Numeric error code.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}
