//! Server-side fan-out of envelopes to every live WebSocket client.
//!
//! [`Broadcaster`] owns the connected-client set. Each client has a
//! bounded outbound queue drained by its connection task, so a sweep never
//! waits on a slow socket: frames are offered with `try_send`, clients
//! whose queue is closed are collected during the sweep and removed after
//! it.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, close_code};
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use super::client_id::ClientId;
use super::subscription::SubscriptionManager;
use crate::config::DEFAULT_CLIENT_QUEUE;
use crate::protocol::{Envelope, EventType, Welcome};

/// Phase of a task lifecycle broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    /// Broadcast as `taskStarted`.
    Started,
    /// Broadcast as `taskFinished`.
    Finished,
}

impl From<TaskPhase> for EventType {
    fn from(phase: TaskPhase) -> Self {
        match phase {
            TaskPhase::Started => Self::TaskStarted,
            TaskPhase::Finished => Self::TaskFinished,
        }
    }
}

/// Handle the connection task receives when its socket is registered.
#[derive(Debug)]
pub struct Registration {
    /// Identity assigned to the socket.
    pub client_id: ClientId,
    /// Frames to write to the socket, in order.
    pub outbound: mpsc::Receiver<Message>,
    /// Cancelled when the server drops the socket abruptly.
    pub kick: CancellationToken,
}

#[derive(Debug)]
struct ClientHandle {
    channel: Option<String>,
    outbound: mpsc::Sender<Message>,
    kick: CancellationToken,
    subscriptions: SubscriptionManager,
}

/// Outcome of offering one frame to one client.
enum Offer {
    Queued,
    Dropped,
    Gone,
}

fn offer(client: &ClientHandle, frame: Message) -> Offer {
    match client.outbound.try_send(frame) {
        Ok(()) => Offer::Queued,
        Err(TrySendError::Full(_)) => Offer::Dropped,
        Err(TrySendError::Closed(_)) => Offer::Gone,
    }
}

#[derive(Debug)]
struct Inner {
    clients: Mutex<HashMap<ClientId, ClientHandle>>,
    queue_capacity: usize,
}

/// Live client set with broadcast operations.
///
/// Cheap to clone; every clone shares the same set.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

impl Broadcaster {
    /// Creates an empty broadcaster whose clients get queues of
    /// `queue_capacity` frames.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients: Mutex::new(HashMap::new()),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Adds a client to the live set.
    ///
    /// The `connected` welcome is queued before the client becomes visible
    /// to broadcasts, so it is always the first frame on the socket.
    pub async fn register(&self, channel: Option<String>) -> Registration {
        let (outbound, rx) = mpsc::channel(self.inner.queue_capacity);
        let client_id = ClientId::new();
        let kick = CancellationToken::new();
        let welcome = Welcome {
            client_id: client_id.to_string(),
            channel: channel.clone(),
            message: "connected".to_string(),
        };
        match Envelope::from_payload(EventType::Connected, &welcome) {
            Ok(envelope) => {
                if let Some(frame) = encode(&envelope) {
                    let _ = outbound.try_send(frame);
                }
            }
            Err(err) => tracing::warn!(%client_id, error = %err, "failed to encode welcome"),
        }
        let handle = ClientHandle {
            channel,
            outbound,
            kick: kick.clone(),
            subscriptions: SubscriptionManager::new(),
        };
        let count = {
            let mut clients = self.inner.clients.lock().await;
            clients.insert(client_id, handle);
            clients.len()
        };
        tracing::info!(%client_id, clients = count, "client connected");
        Registration {
            client_id,
            outbound: rx,
            kick,
        }
    }

    /// Removes a client immediately. Returns `false` if it was already gone.
    pub async fn unregister(&self, client_id: ClientId) -> bool {
        let removed = self.inner.clients.lock().await.remove(&client_id);
        if let Some(client) = &removed {
            tracing::info!(%client_id, channel = ?client.channel, "client disconnected");
        }
        removed.is_some()
    }

    /// Returns the number of live clients.
    pub async fn client_count(&self) -> usize {
        self.inner.clients.lock().await.len()
    }

    /// Sends an envelope to one client. Returns `false` if the client is
    /// unknown or its queue is closed or full.
    pub async fn send_to_client(&self, client_id: ClientId, envelope: &Envelope) -> bool {
        let Some(frame) = encode(envelope) else {
            return false;
        };
        let mut clients = self.inner.clients.lock().await;
        let Some(client) = clients.get(&client_id) else {
            return false;
        };
        match offer(client, frame) {
            Offer::Queued => true,
            Offer::Dropped => false,
            Offer::Gone => {
                clients.remove(&client_id);
                false
            }
        }
    }

    /// Applies `f` to a client's subscription record.
    pub async fn with_subscriptions<R>(
        &self,
        client_id: ClientId,
        f: impl FnOnce(&mut SubscriptionManager) -> R,
    ) -> Option<R> {
        let mut clients = self.inner.clients.lock().await;
        clients
            .get_mut(&client_id)
            .map(|client| f(&mut client.subscriptions))
    }

    /// Delivers an envelope to every live client.
    ///
    /// Returns the number of clients the frame was queued for.
    pub async fn broadcast(&self, envelope: &Envelope) -> usize {
        self.broadcast_where(envelope, |_| true).await
    }

    /// Delivers an envelope to every live client whose subscriptions
    /// satisfy `filter`.
    pub async fn broadcast_where(
        &self,
        envelope: &Envelope,
        filter: impl Fn(&SubscriptionManager) -> bool,
    ) -> usize {
        let Some(frame) = encode(envelope) else {
            return 0;
        };

        let mut clients = self.inner.clients.lock().await;
        let mut delivered = 0;
        let mut stale = Vec::new();
        for (id, client) in clients.iter() {
            if !filter(&client.subscriptions) {
                continue;
            }
            match offer(client, frame.clone()) {
                Offer::Queued => delivered += 1,
                Offer::Dropped => {
                    tracing::warn!(client_id = %id, "client queue full; frame dropped");
                }
                Offer::Gone => stale.push(*id),
            }
        }
        for id in &stale {
            clients.remove(id);
        }
        drop(clients);

        tracing::debug!(
            event_type = %envelope.event_type,
            delivered,
            removed = stale.len(),
            "broadcast"
        );
        delivered
    }

    /// Broadcasts an agent entity as `agentStatusUpdated`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `agent` cannot be encoded.
    pub async fn broadcast_agent_update<T: Serialize + ?Sized>(
        &self,
        agent: &T,
    ) -> Result<usize, serde_json::Error> {
        let envelope = Envelope::from_payload(EventType::AgentStatusUpdated, agent)?;
        Ok(self.broadcast(&envelope).await)
    }

    /// Broadcasts a task entity as `taskStarted` or `taskFinished`.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `task` cannot be encoded.
    pub async fn broadcast_task_update<T: Serialize + ?Sized>(
        &self,
        phase: TaskPhase,
        task: &T,
    ) -> Result<usize, serde_json::Error> {
        let envelope = Envelope::from_payload(phase, task)?;
        Ok(self.broadcast(&envelope).await)
    }

    /// Broadcasts an arbitrary typed payload.
    pub async fn broadcast_custom_message(
        &self,
        event_type: impl Into<EventType>,
        data: serde_json::Value,
    ) -> usize {
        self.broadcast(&Envelope::new(event_type, data)).await
    }

    /// Delivers a `priceUpdated` envelope to clients subscribed to `symbol`.
    pub async fn broadcast_price_update(&self, symbol: &str, data: serde_json::Value) -> usize {
        let envelope = Envelope::new(EventType::PriceUpdated, data);
        self.broadcast_where(&envelope, |subs| subs.matches_symbol(symbol))
            .await
    }

    /// Delivers a `portfolioUpdated` envelope to clients following
    /// `portfolio_id`.
    pub async fn broadcast_portfolio_update(
        &self,
        portfolio_id: &str,
        data: serde_json::Value,
    ) -> usize {
        let envelope = Envelope::new(EventType::PortfolioUpdated, data);
        self.broadcast_where(&envelope, |subs| subs.matches_portfolio(portfolio_id))
            .await
    }

    /// Drops every client without a close handshake.
    ///
    /// Clients observe an unclean close. Returns how many were dropped.
    pub async fn disconnect_all(&self) -> usize {
        let drained: Vec<(ClientId, ClientHandle)> =
            self.inner.clients.lock().await.drain().collect();
        for (_, client) in &drained {
            client.kick.cancel();
        }
        tracing::info!(clients = drained.len(), "dropped all clients");
        drained.len()
    }

    /// Sends a Normal close frame to every client.
    ///
    /// Clients observe a clean close. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(ClientId, ClientHandle)> =
            self.inner.clients.lock().await.drain().collect();
        for (_, client) in &drained {
            let frame = Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: "server closing".into(),
            }));
            if client.outbound.try_send(frame).is_err() {
                client.kick.cancel();
            }
        }
        tracing::info!(clients = drained.len(), "closed all clients");
        drained.len()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CLIENT_QUEUE)
    }
}

fn encode(envelope: &Envelope) -> Option<Message> {
    match envelope.to_text() {
        Ok(text) => Some(Message::text(text)),
        Err(err) => {
            tracing::warn!(event_type = %envelope.event_type, error = %err, "failed to encode envelope");
            None
        }
    }
}
