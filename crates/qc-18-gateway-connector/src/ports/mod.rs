//! Ports for the gateway connector.
//!
//! - [`outbound`]: the transport that signs and delivers messages to gateways
//! - [`inbound`]: the callback surface the transport drives, and the rate
//!   limiting contract applied to it

pub mod inbound;
pub mod outbound;

pub use inbound::{GatewayConnectorHandler, SenderRateLimiter};
pub use outbound::{GatewayConnector, TransportError};
