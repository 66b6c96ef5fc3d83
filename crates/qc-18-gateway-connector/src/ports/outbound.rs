//! Outbound port: the transport to the gateway fleet.

use crate::domain::types::MessageBody;
use crate::ports::inbound::GatewayConnectorHandler;
use async_trait::async_trait;
use std::sync::Arc;

/// Connection to a set of gateway nodes.
///
/// Signing, authentication and the wire protocol live behind this trait.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Destination domain (DON) this connector serves
    fn don_id(&self) -> String;

    /// Identifiers of the currently known gateway nodes
    fn gateway_ids(&self) -> Vec<String>;

    /// Sign `body` and send it to `gateway_id`
    async fn sign_and_send_to_gateway(
        &self,
        gateway_id: &str,
        body: MessageBody,
    ) -> Result<(), TransportError>;

    /// Route inbound messages for `methods` to `handler`
    fn add_handler(
        &self,
        methods: &[&str],
        handler: Arc<dyn GatewayConnectorHandler>,
    ) -> Result<(), TransportError>;
}

/// Transport error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("gateway unavailable: {0}")]
    GatewayUnavailable(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("handler already registered for method {0}")]
    DuplicateHandler(String),
    #[error("no handler registered for method {0}")]
    NoHandler(String),
}
