//! Client side: multiplexed endpoints with reconnection and heartbeat.
//!
//! A [`ConnectionManager`] is created once per process with a
//! [`crate::config::ClientConfig`] and an [`crate::dispatch::EventDispatcher`],
//! then passed to whatever needs to send or observe connectivity.

pub mod backoff;
pub mod endpoint;
pub mod manager;

pub use backoff::ReconnectPolicy;
pub use endpoint::{EndpointState, EndpointStatus};
pub use manager::ConnectionManager;
