//! Statically-typed routing keys for the wire protocol.
//!
//! Every envelope carries a string `type`. [`EventType`] names the types
//! this crate knows about and keeps an open [`EventType::Custom`] variant
//! so collaborators can route their own keys without touching this enum.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Routing key of an [`super::Envelope`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Client → server liveness probe.
    Ping,
    /// Server → client liveness reply.
    Pong,
    /// Server → new client welcome (unicast).
    Connected,
    /// Server → client protocol error reply.
    Error,
    /// Server → client acknowledgement of a subscribe control message.
    Subscribed,
    /// Server → client acknowledgement of an unsubscribe control message.
    Unsubscribed,
    /// An agent changed status.
    AgentStatusUpdated,
    /// A task started executing.
    TaskStarted,
    /// A task finished executing.
    TaskFinished,
    /// A portfolio valuation changed.
    PortfolioUpdated,
    /// A symbol price ticked.
    PriceUpdated,
    /// An alert was raised.
    AlertRaised,
    /// Legacy alias of [`EventType::PriceUpdated`].
    LegacyPriceUpdate,
    /// Legacy alias of [`EventType::PortfolioUpdated`].
    LegacyPortfolioUpdate,
    /// Client → server: start receiving price ticks for symbols.
    SubscribePrices,
    /// Client → server: stop receiving price ticks.
    UnsubscribePrices,
    /// Client → server: start receiving updates for a portfolio.
    SubscribePortfolio,
    /// Client → server: stop receiving portfolio updates.
    UnsubscribePortfolio,
    /// Any other routing key.
    Custom(String),
}

impl EventType {
    /// Returns the wire representation of this type.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Connected => "connected",
            Self::Error => "error",
            Self::Subscribed => "subscribed",
            Self::Unsubscribed => "unsubscribed",
            Self::AgentStatusUpdated => "agentStatusUpdated",
            Self::TaskStarted => "taskStarted",
            Self::TaskFinished => "taskFinished",
            Self::PortfolioUpdated => "portfolioUpdated",
            Self::PriceUpdated => "priceUpdated",
            Self::AlertRaised => "alertRaised",
            Self::LegacyPriceUpdate => "price_update",
            Self::LegacyPortfolioUpdate => "portfolio_update",
            Self::SubscribePrices => "subscribe_prices",
            Self::UnsubscribePrices => "unsubscribe_prices",
            Self::SubscribePortfolio => "subscribe_portfolio",
            Self::UnsubscribePortfolio => "unsubscribe_portfolio",
            Self::Custom(name) => name,
        }
    }

    /// Returns `true` for types consumed by the transport layer itself.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Ping
                | Self::Pong
                | Self::SubscribePrices
                | Self::UnsubscribePrices
                | Self::SubscribePortfolio
                | Self::UnsubscribePortfolio
        )
    }

    /// Returns `true` for the legacy aliases the compatibility shim rewrites.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        matches!(self, Self::LegacyPriceUpdate | Self::LegacyPortfolioUpdate)
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        match s {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "connected" => Self::Connected,
            "error" => Self::Error,
            "subscribed" => Self::Subscribed,
            "unsubscribed" => Self::Unsubscribed,
            "agentStatusUpdated" => Self::AgentStatusUpdated,
            "taskStarted" => Self::TaskStarted,
            "taskFinished" => Self::TaskFinished,
            "portfolioUpdated" => Self::PortfolioUpdated,
            "priceUpdated" => Self::PriceUpdated,
            "alertRaised" => Self::AlertRaised,
            "price_update" => Self::LegacyPriceUpdate,
            "portfolio_update" => Self::LegacyPortfolioUpdate,
            "subscribe_prices" => Self::SubscribePrices,
            "unsubscribe_prices" => Self::UnsubscribePrices,
            "subscribe_portfolio" => Self::SubscribePortfolio,
            "unsubscribe_portfolio" => Self::UnsubscribePortfolio,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        match Self::from(s.as_str()) {
            Self::Custom(_) => Self::Custom(s),
            known => known,
        }
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}
