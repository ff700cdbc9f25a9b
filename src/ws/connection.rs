//! Per-socket read/write loop on the server side.
//!
//! Registers the socket with the [`Broadcaster`] (which queues the
//! `connected` welcome), answers `ping` envelopes, applies subscribe/unsubscribe control
//! messages, and removes the client as soon as the socket closes.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use super::broadcaster::Broadcaster;
use super::client_id::ClientId;
use crate::protocol::{
    Envelope, ErrorReply, EventType, PortfolioSubscription, PriceSubscription,
};

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Frames queued by the broadcaster are written by a dedicated task.
/// - Frames from the client are handled in receipt order.
/// - Transport-level Ping frames are answered by the WebSocket stack.
pub async fn run_connection(socket: WebSocket, broadcaster: Broadcaster, channel: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let registration = broadcaster.register(channel).await;
    let client_id = registration.client_id;
    let mut outbound = registration.outbound;
    let kick = registration.kick;

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let closing = matches!(frame, Message::Close(_));
            if ws_tx.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    let kicked = loop {
        tokio::select! {
            () = kick.cancelled() => break true,
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_text_message(&broadcaster, client_id, text.as_str()).await {
                            broadcaster.send_to_client(client_id, &reply).await;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break false,
                    Some(Err(err)) => {
                        tracing::debug!(%client_id, error = %err, "ws read failed");
                        break false;
                    }
                    _ => {}
                }
            }
        }
    };

    broadcaster.unregister(client_id).await;
    if kicked {
        writer.abort();
    }
    tracing::debug!(%client_id, kicked, "ws connection closed");
}

/// Handles a text frame from the client, returning an optional reply.
pub async fn handle_text_message(
    broadcaster: &Broadcaster,
    client_id: ClientId,
    text: &str,
) -> Option<Envelope> {
    let envelope = match Envelope::parse(text) {
        Ok(envelope) => envelope,
        Err(err) => return Some(error_reply(400, format!("malformed envelope: {err}"))),
    };

    match envelope.event_type {
        EventType::Ping => Some(Envelope::pong()),
        EventType::SubscribePrices => {
            let request = match parse_or_default::<PriceSubscription>(envelope.data) {
                Ok(request) => request,
                Err(err) => return Some(error_reply(400, format!("invalid subscribe_prices: {err}"))),
            };
            let (symbols, all) = broadcaster
                .with_subscriptions(client_id, |subs| {
                    subs.subscribe_prices(&request.symbols);
                    (subs.symbols(), subs.is_subscribed_all())
                })
                .await?;
            Some(Envelope::new(
                EventType::Subscribed,
                json!({ "channel": "prices", "symbols": symbols, "wildcard": all }),
            ))
        }
        EventType::UnsubscribePrices => {
            let request = match parse_or_default::<PriceSubscription>(envelope.data) {
                Ok(request) => request,
                Err(err) => {
                    return Some(error_reply(400, format!("invalid unsubscribe_prices: {err}")));
                }
            };
            let remaining = broadcaster
                .with_subscriptions(client_id, |subs| {
                    subs.unsubscribe_prices(&request.symbols);
                    subs.symbols()
                })
                .await?;
            Some(Envelope::new(
                EventType::Unsubscribed,
                json!({ "channel": "prices", "symbols": request.symbols, "remaining": remaining }),
            ))
        }
        EventType::SubscribePortfolio => {
            let request = match serde_json::from_value::<PortfolioSubscription>(envelope.data) {
                Ok(request) => request,
                Err(err) => {
                    return Some(error_reply(400, format!("invalid subscribe_portfolio: {err}")));
                }
            };
            broadcaster
                .with_subscriptions(client_id, |subs| {
                    subs.subscribe_portfolio(&request.portfolio_id);
                })
                .await?;
            Some(Envelope::new(
                EventType::Subscribed,
                json!({ "channel": "portfolio", "portfolioId": request.portfolio_id }),
            ))
        }
        EventType::UnsubscribePortfolio => {
            let previous = broadcaster
                .with_subscriptions(client_id, |subs| subs.unsubscribe_portfolio())
                .await?;
            Some(Envelope::new(
                EventType::Unsubscribed,
                json!({ "channel": "portfolio", "portfolioId": previous }),
            ))
        }
        other => {
            tracing::debug!(%client_id, event_type = %other, "ignoring client message");
            None
        }
    }
}

/// Parses a control payload, treating `null` as the default value.
fn parse_or_default<T>(data: serde_json::Value) -> Result<T, serde_json::Error>
where
    T: serde::de::DeserializeOwned + Default,
{
    if data.is_null() {
        Ok(T::default())
    } else {
        serde_json::from_value(data)
    }
}

fn error_reply(code: u16, message: String) -> Envelope {
    let reply = ErrorReply { code, message };
    Envelope::from_payload(EventType::Error, &reply)
        .unwrap_or_else(|_| Envelope::new(EventType::Error, json!({ "code": code })))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    async fn reply(broadcaster: &Broadcaster, client_id: ClientId, text: &str) -> Envelope {
        let Some(reply) = handle_text_message(broadcaster, client_id, text).await else {
            panic!("expected a reply to {text}");
        };
        reply
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let broadcaster = Broadcaster::default();
        let reg = broadcaster.register(None).await;
        let env = reply(&broadcaster, reg.client_id, r#"{"type":"ping"}"#).await;
        assert_eq!(env.event_type, EventType::Pong);
    }

    #[tokio::test]
    async fn malformed_json_returns_error() {
        let broadcaster = Broadcaster::default();
        let reg = broadcaster.register(None).await;
        let env = reply(&broadcaster, reg.client_id, "not json").await;
        assert_eq!(env.event_type, EventType::Error);
        assert_eq!(env.data["code"], json!(400));
    }

    #[tokio::test]
    async fn subscribe_prices_updates_record() {
        let broadcaster = Broadcaster::default();
        let reg = broadcaster.register(None).await;
        let env = reply(
            &broadcaster,
            reg.client_id,
            r#"{"type":"subscribe_prices","data":{"symbols":["AAPL","MSFT"]}}"#,
        )
        .await;
        assert_eq!(env.event_type, EventType::Subscribed);
        assert_eq!(env.data["symbols"], json!(["AAPL", "MSFT"]));

        let matches = broadcaster
            .with_subscriptions(reg.client_id, |subs| subs.matches_symbol("AAPL"))
            .await;
        assert_eq!(matches, Some(true));
    }

    #[tokio::test]
    async fn unsubscribe_prices_without_payload_clears() {
        let broadcaster = Broadcaster::default();
        let reg = broadcaster.register(None).await;
        let _ = reply(
            &broadcaster,
            reg.client_id,
            r#"{"type":"subscribe_prices","data":{"symbols":["AAPL"]}}"#,
        )
        .await;
        let env = reply(&broadcaster, reg.client_id, r#"{"type":"unsubscribe_prices"}"#).await;
        assert_eq!(env.event_type, EventType::Unsubscribed);
        assert_eq!(env.data["remaining"], json!([]));
    }

    #[tokio::test]
    async fn portfolio_subscription_round_trip() {
        let broadcaster = Broadcaster::default();
        let reg = broadcaster.register(None).await;
        let env = reply(
            &broadcaster,
            reg.client_id,
            r#"{"type":"subscribe_portfolio","data":{"portfolioId":"p1"}}"#,
        )
        .await;
        assert_eq!(env.data["portfolioId"], json!("p1"));

        let env = reply(&broadcaster, reg.client_id, r#"{"type":"unsubscribe_portfolio"}"#).await;
        assert_eq!(env.event_type, EventType::Unsubscribed);
        assert_eq!(env.data["portfolioId"], json!("p1"));
    }

    #[tokio::test]
    async fn subscribe_portfolio_requires_id() {
        let broadcaster = Broadcaster::default();
        let reg = broadcaster.register(None).await;
        let env = reply(
            &broadcaster,
            reg.client_id,
            r#"{"type":"subscribe_portfolio","data":{}}"#,
        )
        .await;
        assert_eq!(env.event_type, EventType::Error);
    }

    #[tokio::test]
    async fn domain_events_from_clients_are_ignored() {
        let broadcaster = Broadcaster::default();
        let reg = broadcaster.register(None).await;
        let out = handle_text_message(
            &broadcaster,
            reg.client_id,
            r#"{"type":"taskStarted","data":{}}"#,
        )
        .await;
        assert!(out.is_none());
    }
}
