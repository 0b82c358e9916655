//! In-memory agent relay: message log, tag filtering and request/response
//! correlation.
//!
//! All state lives in one [`Broker`]; the HTTP layer in [`crate::gateway`]
//! is a thin adapter over it.

pub mod broker;
pub mod error;
pub mod message;
pub mod store;

pub use broker::{
    Broker, BrokerOptions, BrokerStatus, PendingResponse, Resolved, DEFAULT_RESPONSE_TIMEOUT_SECS,
};
pub use error::{RelayError, RelayResult};
pub use message::{Message, MessageFilter, NewMessage};
pub use store::{MessageCounts, MessageStore};
