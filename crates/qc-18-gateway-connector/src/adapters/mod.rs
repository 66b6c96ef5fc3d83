//! Adapters implementing the connector ports.

pub mod in_memory;

pub use in_memory::{InMemoryGatewayConnector, SentMessage};
