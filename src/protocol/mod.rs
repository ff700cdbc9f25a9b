//! Wire protocol: envelope, routing keys, control payloads and the
//! legacy compatibility shim.

pub mod compat;
pub mod control;
pub mod envelope;
pub mod event_type;

pub use control::{ErrorReply, PortfolioSubscription, PriceSubscription, Welcome};
pub use envelope::{Envelope, ParseError};
pub use event_type::EventType;
