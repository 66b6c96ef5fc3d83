//! Error types for the gateway connector.
//!
//! Dispatch errors ([`ConnectorError`]) are returned to the caller. Inbound
//! errors ([`InboundError`]) have no caller to go back to, so the handler logs
//! them and drops the message.

use crate::domain::config::ConfigError;
use crate::domain::correlation::RequestId;
use crate::ports::TransportError;
use std::time::Duration;

/// Errors returned from the dispatch path
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Invalid configuration at construction time
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Request payload could not be serialized
    #[error("failed to marshal request: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another request with the same id is still in flight
    #[error("request already in flight: {0}")]
    DuplicateRequestId(RequestId),

    /// Transport reported no gateway nodes
    #[error("no gateway nodes available")]
    NoGatewayAvailable,

    /// Transport failed to deliver the request
    #[error("failed to send request to gateway {gateway_id}: {source}")]
    SendFailed {
        gateway_id: String,
        #[source]
        source: TransportError,
    },

    /// Deadline (timeout plus margin) elapsed before a response arrived
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Response slot was dropped without a value
    #[error("request cancelled before a response arrived")]
    Cancelled,

    /// Response payload does not decode into the expected type
    #[error("malformed response payload: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl ConnectorError {
    /// True for the deadline outcome of a dispatch
    pub fn is_timeout(&self) -> bool {
        matches!(self, ConnectorError::Timeout(_))
    }
}

/// Reasons an inbound gateway message is dropped
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboundError {
    #[error("request rate-limited for sender {sender}")]
    RateLimited { sender: String },

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("failed to unmarshal payload: {0}")]
    MalformedResponse(String),

    /// No live waiter: already resolved, timed out, or never registered
    #[error("no response channel found for message {0}")]
    UnknownRequestId(RequestId),
}

/// Lifecycle transition errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("{0} has already been started")]
    AlreadyStarted(String),

    #[error("{0} is stopped")]
    Stopped(String),

    #[error("{0} has not been started")]
    NotStarted(String),

    /// Transport refused the handler registration
    #[error("failed to register {name}: {reason}")]
    Registration { name: String, reason: String },
}
