//! Endpoint descriptor: one named logical connection.
//!
//! An endpoint owns its live session (reader, writer and heartbeat tasks)
//! and at most one scheduled reconnect task. Every task is tied to a
//! [`CancellationToken`], so tearing an endpoint down structurally stops
//! all of its timers.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    /// No socket; a reconnect may or may not be scheduled.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Socket open, heartbeat running.
    Connected,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    /// Endpoint name.
    pub name: String,
    /// Endpoint URL.
    pub url: String,
    /// Current state.
    pub state: EndpointState,
    /// Consecutive failed attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// Whether an automatic reconnect is pending.
    pub reconnect_scheduled: bool,
    /// Last `pong` received on the current or a previous session.
    pub last_pong_at: Option<DateTime<Utc>>,
}

/// Outbound handle of a live session.
#[derive(Debug, Clone)]
pub(crate) struct Link {
    pub(crate) generation: u64,
    pub(crate) outbound: mpsc::UnboundedSender<Message>,
}

/// A background task paired with the token that stops it.
#[derive(Debug)]
pub(crate) struct OwnedTask {
    pub(crate) token: CancellationToken,
    pub(crate) handle: JoinHandle<()>,
}

impl OwnedTask {
    /// Cancels the task without waiting; the task observes its token at
    /// its next suspension point.
    pub(crate) fn cancel(self) {
        self.token.cancel();
        drop(self.handle);
    }

    fn is_pending(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

/// Tasks belonging to one open socket.
#[derive(Debug)]
pub(crate) struct Session {
    pub(crate) token: CancellationToken,
    pub(crate) writer: JoinHandle<()>,
    pub(crate) heartbeat: JoinHandle<()>,
}

impl Session {
    /// Stops heartbeat and reader, then lets the writer flush a clean
    /// close frame before returning.
    pub(crate) async fn close(self, grace: Duration) {
        self.token.cancel();
        self.heartbeat.abort();
        if tokio::time::timeout(grace, self.writer).await.is_err() {
            tracing::debug!("session writer did not close within grace period");
        }
    }
}

/// Lifecycle fields mutated only under the endpoint's lifecycle lock.
#[derive(Debug, Default)]
pub(crate) struct Lifecycle {
    pub(crate) generation: u64,
    pub(crate) session: Option<Session>,
}

/// Descriptor of one registered endpoint.
///
/// Fields that callers query often (state, attempts, outbound link) and
/// the pending reconnect task live outside the lifecycle lock, so status
/// reads, sends and retry cancellation never wait behind an in-flight
/// handshake.
#[derive(Debug)]
pub(crate) struct Endpoint {
    pub(crate) name: String,
    pub(crate) url: String,
    pub(crate) state: watch::Sender<EndpointState>,
    pub(crate) attempts: AtomicU32,
    pub(crate) link: Mutex<Option<Link>>,
    pub(crate) last_pong: Mutex<Option<DateTime<Utc>>>,
    pub(crate) reconnect: Mutex<Option<OwnedTask>>,
    pub(crate) lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl Endpoint {
    pub(crate) fn new(name: &str, url: &str) -> Self {
        let (state, _) = watch::channel(EndpointState::Disconnected);
        Self {
            name: name.to_string(),
            url: url.to_string(),
            state,
            attempts: AtomicU32::new(0),
            link: Mutex::new(None),
            last_pong: Mutex::new(None),
            reconnect: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
        }
    }

    pub(crate) fn state(&self) -> EndpointState {
        *self.state.borrow()
    }

    pub(crate) fn set_state(&self, state: EndpointState) {
        self.state.send_replace(state);
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reconnect_slot(&self) -> MutexGuard<'_, Option<OwnedTask>> {
        self.reconnect.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a new pending reconnect, cancelling any previous one.
    pub(crate) fn set_reconnect(&self, task: OwnedTask) {
        if let Some(previous) = self.reconnect_slot().replace(task) {
            previous.cancel();
        }
    }

    /// Removes the pending reconnect without cancelling it.
    pub(crate) fn take_reconnect(&self) -> Option<OwnedTask> {
        self.reconnect_slot().take()
    }

    /// Cancels the pending reconnect, if any.
    pub(crate) fn cancel_reconnect(&self) {
        if let Some(task) = self.take_reconnect() {
            task.cancel();
        }
    }

    pub(crate) fn reconnect_scheduled(&self) -> bool {
        self.reconnect_slot().as_ref().is_some_and(OwnedTask::is_pending)
    }

    pub(crate) fn record_pong(&self) {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    pub(crate) fn last_pong(&self) -> Option<DateTime<Utc>> {
        *self.last_pong.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn status(&self) -> EndpointStatus {
        EndpointStatus {
            name: self.name.clone(),
            url: self.url.clone(),
            state: self.state(),
            reconnect_attempts: self.attempts(),
            reconnect_scheduled: self.reconnect_scheduled(),
            last_pong_at: self.last_pong(),
        }
    }

    /// Queues a frame on the live session.
    ///
    /// Returns `false` unless the endpoint is connected and its writer is
    /// still accepting frames.
    pub(crate) fn send(&self, frame: Message) -> bool {
        if self.state() != EndpointState::Connected {
            return false;
        }
        self.link()
            .as_ref()
            .is_some_and(|link| link.outbound.send(frame).is_ok())
    }
}
