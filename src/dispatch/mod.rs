//! Event dispatch layer decoupling transport from business consumers.

pub mod event_dispatcher;

pub use event_dispatcher::{Callback, EventDispatcher, Subscription, scoped_key};
