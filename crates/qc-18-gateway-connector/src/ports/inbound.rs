//! Inbound ports: what the transport calls, and the rate limiting contract.

use crate::domain::error::LifecycleError;
use crate::domain::types::GatewayMessage;
use async_trait::async_trait;

/// Handler registered with a gateway connector for a set of methods.
///
/// The transport calls `handle_gateway_message` for every message whose
/// method the handler registered for, possibly concurrently.
#[async_trait]
pub trait GatewayConnectorHandler: Send + Sync {
    /// Register with the transport and start background work
    async fn start(&self) -> Result<(), LifecycleError>;

    /// Mark the handler stopped
    async fn close(&self) -> Result<(), LifecycleError>;

    /// Process a message delivered by `gateway_id`
    async fn handle_gateway_message(&self, gateway_id: &str, message: GatewayMessage);
}

/// Decides whether an inbound message from `sender` may be processed now.
///
/// Implementations must be safe to call from many delivery tasks at once.
pub trait SenderRateLimiter: Send + Sync {
    fn allow(&self, sender: &str) -> bool;

    /// Drop state for senders that have been idle long enough to be back at
    /// full capacity
    fn retain_recent(&self) {}
}
