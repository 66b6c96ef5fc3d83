//! In-process gateway connector.
//!
//! Stands in for the network transport in tests and local wiring: it records
//! every outgoing envelope, streams them to an outbox receiver, and routes
//! `deliver()` calls to the handler registered for the message's method.

use crate::domain::types::{GatewayMessage, MessageBody};
use crate::ports::{GatewayConnector, GatewayConnectorHandler, TransportError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// An envelope handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub gateway_id: String,
    pub body: MessageBody,
}

/// In-memory implementation of [`GatewayConnector`]
pub struct InMemoryGatewayConnector {
    don_id: String,
    gateways: RwLock<Vec<String>>,
    /// Handlers are held weakly so the connector does not keep them alive
    handlers: RwLock<HashMap<String, Weak<dyn GatewayConnectorHandler>>>,
    sent: Mutex<Vec<SentMessage>>,
    outbox_tx: mpsc::UnboundedSender<SentMessage>,
    outbox_rx: Mutex<Option<mpsc::UnboundedReceiver<SentMessage>>>,
    fail_sends: AtomicBool,
}

impl InMemoryGatewayConnector {
    pub fn new<I, S>(don_id: impl Into<String>, gateways: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Self {
            don_id: don_id.into(),
            gateways: RwLock::new(gateways.into_iter().map(Into::into).collect()),
            handlers: RwLock::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            outbox_tx,
            outbox_rx: Mutex::new(Some(outbox_rx)),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Replace the set of known gateways
    pub fn set_gateways<I, S>(&self, gateways: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        *self.gateways.write() = gateways.into_iter().map(Into::into).collect();
    }

    /// Make every subsequent send fail (or succeed again)
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Take the stream of sent envelopes. Only the first call gets it.
    pub fn take_outbox(&self) -> Option<mpsc::UnboundedReceiver<SentMessage>> {
        self.outbox_rx.lock().take()
    }

    /// Snapshot of every envelope sent so far
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Whether a live handler is registered for `method`
    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers
            .read()
            .get(method)
            .is_some_and(|h| h.strong_count() > 0)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers
            .read()
            .values()
            .filter(|h| h.strong_count() > 0)
            .count()
    }

    /// Deliver an inbound message as if `gateway_id` had sent it
    pub async fn deliver(
        &self,
        gateway_id: &str,
        message: GatewayMessage,
    ) -> Result<(), TransportError> {
        let handler = self
            .handlers
            .read()
            .get(&message.body.method)
            .and_then(Weak::upgrade)
            .ok_or_else(|| TransportError::NoHandler(message.body.method.clone()))?;

        handler.handle_gateway_message(gateway_id, message).await;
        Ok(())
    }
}

#[async_trait]
impl GatewayConnector for InMemoryGatewayConnector {
    fn don_id(&self) -> String {
        self.don_id.clone()
    }

    fn gateway_ids(&self) -> Vec<String> {
        self.gateways.read().clone()
    }

    async fn sign_and_send_to_gateway(
        &self,
        gateway_id: &str,
        body: MessageBody,
    ) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::Relaxed) {
            warn!(gateway_id = gateway_id, message_id = %body.message_id, "Simulated send failure");
            return Err(TransportError::SendFailed("simulated send failure".into()));
        }
        if !self.gateways.read().iter().any(|g| g == gateway_id) {
            return Err(TransportError::GatewayUnavailable(gateway_id.to_string()));
        }

        let sent = SentMessage {
            gateway_id: gateway_id.to_string(),
            body,
        };
        debug!(gateway_id = gateway_id, message_id = %sent.body.message_id, "Envelope sent");
        self.sent.lock().push(sent.clone());
        // Nobody may be listening; the record above is enough then
        let _ = self.outbox_tx.send(sent);
        Ok(())
    }

    fn add_handler(
        &self,
        methods: &[&str],
        handler: Arc<dyn GatewayConnectorHandler>,
    ) -> Result<(), TransportError> {
        let mut handlers = self.handlers.write();
        if let Some(taken) = methods
            .iter()
            .find(|m| handlers.get(**m).is_some_and(|h| h.strong_count() > 0))
        {
            return Err(TransportError::DuplicateHandler(taken.to_string()));
        }
        for method in methods {
            handlers.insert(method.to_string(), Arc::downgrade(&handler));
        }
        Ok(())
    }
}
