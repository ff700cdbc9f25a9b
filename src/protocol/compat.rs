//! Backward-compatibility shim for legacy event names.
//!
//! Older servers emit `price_update` and `portfolio_update` with
//! snake-case-era payloads. [`upgrade`] rewrites them into the current
//! `priceUpdated` / `portfolioUpdated` shape before dispatch so that
//! subscribers only ever see one format.

use serde_json::Value;

use super::{Envelope, EventType};

/// Rewrites a legacy envelope into its current-format equivalent.
///
/// Envelopes with a non-legacy type are returned untouched.
#[must_use]
pub fn upgrade(envelope: Envelope) -> Envelope {
    let Envelope {
        event_type,
        data,
        timestamp,
    } = envelope;

    let (event_type, data) = match event_type {
        EventType::LegacyPriceUpdate => (EventType::PriceUpdated, upgrade_price(data)),
        EventType::LegacyPortfolioUpdate => {
            (EventType::PortfolioUpdated, upgrade_portfolio(data))
        }
        other => (other, data),
    };

    Envelope {
        event_type,
        data,
        timestamp,
    }
}

fn upgrade_price(mut data: Value) -> Value {
    if let Some(obj) = data.as_object_mut() {
        alias_field(obj, "changePercent24h", "change24h");
    }
    data
}

fn upgrade_portfolio(mut data: Value) -> Value {
    if let Some(obj) = data.as_object_mut() {
        alias_field(obj, "changePercent24h", "change24h");
        alias_field(obj, "totalValue", "value");
    }
    data
}

/// Copies `source` into `target` when `target` is absent or null.
fn alias_field(obj: &mut serde_json::Map<String, Value>, target: &str, source: &str) {
    let missing = obj.get(target).is_none_or(Value::is_null);
    if missing && let Some(value) = obj.get(source).cloned() {
        obj.insert(target.to_string(), value);
    }
}
