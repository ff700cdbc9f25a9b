//! Per-client subscription state.
//!
//! Tracks which price symbols and which portfolio a WebSocket client has
//! asked for, and filters targeted broadcasts accordingly. Untargeted
//! broadcasts (agent, task, alert, custom) ignore this state.

use std::collections::HashSet;

/// Wildcard symbol that matches every price tick.
pub const ALL_SYMBOLS: &str = "*";

/// Subscription record of a single WebSocket connection.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Subscribed symbols. Ignored while `all_symbols` is set.
    symbols: HashSet<String>,
    /// Whether the client subscribed with the `"*"` wildcard.
    all_symbols: bool,
    /// Followed portfolio, if any.
    portfolio: Option<String>,
}

impl SubscriptionManager {
    /// Creates a new empty subscription record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds symbols. `"*"` enables the wildcard.
    pub fn subscribe_prices(&mut self, symbols: &[String]) {
        for symbol in symbols {
            if symbol == ALL_SYMBOLS {
                self.all_symbols = true;
            } else {
                self.symbols.insert(symbol.clone());
            }
        }
    }

    /// Removes symbols. An empty list removes every symbol and the wildcard.
    pub fn unsubscribe_prices(&mut self, symbols: &[String]) {
        if symbols.is_empty() {
            self.symbols.clear();
            self.all_symbols = false;
            return;
        }
        for symbol in symbols {
            if symbol == ALL_SYMBOLS {
                self.all_symbols = false;
            } else {
                self.symbols.remove(symbol);
            }
        }
    }

    /// Returns `true` if price ticks for `symbol` should be delivered.
    #[must_use]
    pub fn matches_symbol(&self, symbol: &str) -> bool {
        self.all_symbols || self.symbols.contains(symbol)
    }

    /// Follows `portfolio_id`, replacing any previous portfolio.
    pub fn subscribe_portfolio(&mut self, portfolio_id: &str) {
        self.portfolio = Some(portfolio_id.to_string());
    }

    /// Stops following the current portfolio.
    pub fn unsubscribe_portfolio(&mut self) -> Option<String> {
        self.portfolio.take()
    }

    /// Returns `true` if updates for `portfolio_id` should be delivered.
    #[must_use]
    pub fn matches_portfolio(&self, portfolio_id: &str) -> bool {
        self.portfolio.as_deref() == Some(portfolio_id)
    }

    /// Returns the followed portfolio.
    #[must_use]
    pub fn portfolio(&self) -> Option<&str> {
        self.portfolio.as_deref()
    }

    /// Returns the explicitly subscribed symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.symbols.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Returns `true` if the wildcard subscription is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.all_symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_matches_nothing() {
        let subs = SubscriptionManager::new();
        assert!(!subs.matches_symbol("AAPL"));
        assert!(!subs.matches_portfolio("p1"));
    }

    #[test]
    fn subscribe_specific_symbols() {
        let mut subs = SubscriptionManager::new();
        subs.subscribe_prices(&syms(&["AAPL", "MSFT"]));
        assert!(subs.matches_symbol("AAPL"));
        assert!(!subs.matches_symbol("TSLA"));
        assert_eq!(subs.symbols(), syms(&["AAPL", "MSFT"]));
    }

    #[test]
    fn wildcard_matches_everything() {
        let mut subs = SubscriptionManager::new();
        subs.subscribe_prices(&syms(&["*"]));
        assert!(subs.is_subscribed_all());
        assert!(subs.matches_symbol("ANY"));
    }

    #[test]
    fn unsubscribe_without_symbols_clears_all() {
        let mut subs = SubscriptionManager::new();
        subs.subscribe_prices(&syms(&["AAPL", "*"]));
        subs.unsubscribe_prices(&[]);
        assert!(!subs.matches_symbol("AAPL"));
        assert!(!subs.is_subscribed_all());
    }

    #[test]
    fn unsubscribe_single_symbol() {
        let mut subs = SubscriptionManager::new();
        subs.subscribe_prices(&syms(&["AAPL", "MSFT"]));
        subs.unsubscribe_prices(&syms(&["AAPL"]));
        assert!(!subs.matches_symbol("AAPL"));
        assert!(subs.matches_symbol("MSFT"));
    }

    #[test]
    fn portfolio_follow_and_unfollow() {
        let mut subs = SubscriptionManager::new();
        subs.subscribe_portfolio("p1");
        assert!(subs.matches_portfolio("p1"));
        subs.subscribe_portfolio("p2");
        assert!(!subs.matches_portfolio("p1"));
        assert_eq!(subs.unsubscribe_portfolio().as_deref(), Some("p2"));
        assert!(subs.portfolio().is_none());
    }
}
