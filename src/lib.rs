//! # pulse-gateway
//!
//! Real-time event distribution over WebSocket.
//!
//! The server side fans domain events out to every connected client. The
//! client side keeps several named WebSocket connections alive at once,
//! reconnecting with backoff and routing every inbound envelope to
//! in-process subscribers.
//!
//! ## Architecture
//!
//! ```text
//! Domain mutation / POST /api/v1/events
//!     │
//!     ├── Broadcaster (ws/)          serializes an Envelope, fans out
//!     ├── Connection loop (ws/)      welcome, ping/pong, subscriptions
//!     │
//!     ╞══ WebSocket ══
//!     │
//!     ├── ConnectionManager (client/) one Endpoint per named socket
//!     ├── Compatibility shim (protocol/) legacy type upgrades
//!     │
//!     └── EventDispatcher (dispatch/) "type" and "endpoint:type" keys
//! ```
//!
//! The [`simulator`] module runs the same server protocol with scripted or
//! randomized traffic, for driving the client without a live backend.

pub mod api;
pub mod app_state;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod simulator;
pub mod ws;
