//! Outgoing connector handler - dispatch and inbound correlation.
//!
//! Dispatch path (`handle_single_node_request`):
//! 1. Default the timeout, add the scheduling margin, fix the deadline
//! 2. Serialize the request
//! 3. Register the correlator slot *before* sending
//! 4. Pick the lexicographically first gateway and send once
//! 5. Wait for the slot or the deadline
//!
//! Inbound path (`handle_gateway_message`): rate limit by sender, check the
//! method, decode the response, resolve the slot. Every failure on this path
//! is logged and the message dropped.

use crate::domain::config::{ConfigError, ConnectorConfig};
use crate::domain::correlation::RequestId;
use crate::domain::error::{ConnectorError, InboundError, LifecycleError};
use crate::domain::methods::Method;
use crate::domain::pending::{CorrelatorStats, ResponseCorrelator};
use crate::domain::rate_limit::RateLimiter;
use crate::domain::types::{GatewayMessage, MessageBody, OutboundRequest, OutboundResponse};
use crate::lifecycle::{HealthStatus, ServiceState, StateMachine};
use crate::ports::{GatewayConnector, GatewayConnectorHandler, SenderRateLimiter};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Sends requests to a single gateway node and correlates their responses.
pub struct OutgoingConnectorHandler {
    connector: Arc<dyn GatewayConnector>,
    method: Method,
    name: String,
    config: ConnectorConfig,
    pending: Arc<ResponseCorrelator>,
    rate_limiter: Arc<dyn SenderRateLimiter>,
    lifecycle: StateMachine,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
    /// Self reference handed to the connector on `start`
    this: Weak<Self>,
}

impl OutgoingConnectorHandler {
    /// Create a handler bound to `method`, with a rate limiter built from
    /// `config.rate_limit`.
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        config: ConnectorConfig,
        method: &str,
    ) -> Result<Arc<Self>, ConnectorError> {
        config.validate()?;
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit)?);
        Self::with_rate_limiter(connector, config, method, rate_limiter)
    }

    /// Create a handler with a caller-provided rate limiter
    pub fn with_rate_limiter(
        connector: Arc<dyn GatewayConnector>,
        config: ConnectorConfig,
        method: &str,
        rate_limiter: Arc<dyn SenderRateLimiter>,
    ) -> Result<Arc<Self>, ConnectorError> {
        config.validate()?;
        let method: Method = method.parse()?;
        let name = format!("OutgoingConnectorHandler.{method}");

        Ok(Arc::new_cyclic(|this| Self {
            connector,
            method,
            name,
            config,
            pending: Arc::new(ResponseCorrelator::new()),
            rate_limiter,
            lifecycle: StateMachine::new(),
            sweep_task: Mutex::new(None),
            this: this.clone(),
        }))
    }

    /// Send `request` to the first gateway (sorted by id) and wait for the
    /// correlated response.
    ///
    /// `message_id` must not collide with another in-flight request of this
    /// handler. Dropping the returned future abandons the request. Fails with
    /// [`LifecycleError::Stopped`] once the handler has been closed.
    #[instrument(
        name = "gateway_request",
        skip(self, request),
        fields(message_id = %message_id, method = %self.method)
    )]
    pub async fn handle_single_node_request(
        &self,
        message_id: RequestId,
        mut request: OutboundRequest,
    ) -> Result<GatewayMessage, ConnectorError> {
        if self.lifecycle.state() == ServiceState::Stopped {
            return Err(LifecycleError::Stopped(self.name.clone()).into());
        }

        if request.timeout_ms == 0 {
            request.timeout_ms = self.default_timeout_ms();
        }
        let timeout = Duration::from_millis(u64::from(request.timeout_ms))
            .checked_add(self.config.timeouts.margin)
            .ok_or_else(|| ConfigError::InvalidTimeout("timeout margin overflows".into()))?;
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| ConfigError::InvalidTimeout("request deadline overflows".into()))?;

        let payload = serde_json::to_value(&request)?;

        let rx = self
            .pending
            .register(&message_id, self.method.as_str(), timeout)?;
        let mut guard = PendingGuard::new(&self.pending, &message_id);
        debug!("Sending request to gateway");

        let body = MessageBody::request(&message_id, self.connector.don_id(), self.method, payload);

        let gateway_id =
            select_gateway(self.connector.gateway_ids()).ok_or(ConnectorError::NoGatewayAvailable)?;

        let send = self.connector.sign_and_send_to_gateway(&gateway_id, body);
        match tokio::time::timeout_at(deadline, send).await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                warn!(gateway_id = %gateway_id, error = %source, "Failed to send request to gateway");
                return Err(ConnectorError::SendFailed { gateway_id, source });
            }
            Err(_) => {
                guard.disarm();
                self.pending.time_out(&message_id);
                return Err(ConnectorError::Timeout(timeout));
            }
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(message)) => {
                guard.disarm();
                debug!(gateway_id = %gateway_id, "Received response from gateway");
                Ok(message)
            }
            // Slot dropped by the sweep after the deadline had already passed
            Ok(Err(_)) if Instant::now() >= deadline => {
                guard.disarm();
                self.pending.time_out(&message_id);
                Err(ConnectorError::Timeout(timeout))
            }
            Ok(Err(_)) => Err(ConnectorError::Cancelled),
            Err(_) => {
                guard.disarm();
                self.pending.time_out(&message_id);
                warn!(
                    gateway_id = %gateway_id,
                    timeout_ms = timeout.as_millis(),
                    "Timed out waiting for gateway response"
                );
                Err(ConnectorError::Timeout(timeout))
            }
        }
    }

    /// Like [`handle_single_node_request`](Self::handle_single_node_request),
    /// decoding the response payload.
    pub async fn handle_single_node_request_typed(
        &self,
        message_id: RequestId,
        request: OutboundRequest,
    ) -> Result<OutboundResponse, ConnectorError> {
        let message = self.handle_single_node_request(message_id, request).await?;
        message
            .decode_payload()
            .map_err(|e| ConnectorError::MalformedResponse(e.to_string()))
    }

    /// Apply rate limiting, method and payload checks, then resolve the
    /// pending request. Returns the id of the resolved request.
    pub fn process_gateway_message(&self, message: GatewayMessage) -> Result<RequestId, InboundError> {
        let body = &message.body;
        if !self.rate_limiter.allow(&body.sender) {
            return Err(InboundError::RateLimited {
                sender: body.sender.clone(),
            });
        }

        if !Method::is_supported(&body.method) {
            return Err(InboundError::UnsupportedMethod(body.method.clone()));
        }

        message
            .decode_payload::<OutboundResponse>()
            .map_err(|e| InboundError::MalformedResponse(e.to_string()))?;

        let id = message.body.request_id();
        if self.pending.resolve(&id, message) {
            Ok(id)
        } else {
            Err(InboundError::UnknownRequestId(id))
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn state(&self) -> ServiceState {
        self.lifecycle.state()
    }

    pub fn healthy(&self) -> Result<(), LifecycleError> {
        self.lifecycle.healthy(&self.name)
    }

    /// Named health status for a process supervisor
    pub fn health_report(&self) -> HashMap<String, HealthStatus> {
        HashMap::from([(self.name.clone(), HealthStatus::from(self.state()))])
    }

    pub fn pending_count(&self) -> usize {
        self.pending.pending_count()
    }

    pub fn stats(&self) -> &CorrelatorStats {
        self.pending.stats()
    }

    fn default_timeout_ms(&self) -> u32 {
        u32::try_from(self.config.timeouts.default.as_millis()).unwrap_or(u32::MAX)
    }
}

#[async_trait]
impl GatewayConnectorHandler for OutgoingConnectorHandler {
    async fn start(&self) -> Result<(), LifecycleError> {
        self.lifecycle.try_start(&self.name)?;

        let Some(handler) = self.this.upgrade() else {
            self.lifecycle.abort_start();
            return Err(LifecycleError::Registration {
                name: self.name.clone(),
                reason: "handler is being dropped".into(),
            });
        };

        if let Err(e) = self.connector.add_handler(&[self.method.as_str()], handler) {
            self.lifecycle.abort_start();
            error!(name = %self.name, error = %e, "Failed to register with gateway connector");
            return Err(LifecycleError::Registration {
                name: self.name.clone(),
                reason: e.to_string(),
            });
        }

        if self.config.sweep.enabled {
            let handle = tokio::spawn(sweep_loop(
                Arc::clone(&self.pending),
                Arc::clone(&self.rate_limiter),
                self.config.sweep.interval,
            ));
            *self.sweep_task.lock() = Some(handle);
            // A concurrent close may have run before the handle was stored
            if self.lifecycle.state() == ServiceState::Stopped {
                if let Some(handle) = self.sweep_task.lock().take() {
                    handle.abort();
                }
            }
        }

        info!(name = %self.name, method = %self.method, "Outgoing connector handler started");
        Ok(())
    }

    async fn close(&self) -> Result<(), LifecycleError> {
        if !self.lifecycle.try_stop() {
            debug!(name = %self.name, "Outgoing connector handler already stopped");
            return Ok(());
        }

        if let Some(handle) = self.sweep_task.lock().take() {
            handle.abort();
        }

        info!(
            name = %self.name,
            in_flight = self.pending.pending_count(),
            "Outgoing connector handler stopped"
        );
        Ok(())
    }

    async fn handle_gateway_message(&self, gateway_id: &str, message: GatewayMessage) {
        let message_id = message.body.message_id.clone();
        let method = message.body.method.clone();
        debug!(
            gateway_id = gateway_id,
            method = %method,
            message_id = %message_id,
            "Handling gateway message"
        );

        match self.process_gateway_message(message) {
            Ok(_) => {
                debug!(gateway_id = gateway_id, message_id = %message_id, "Delivered gateway response");
            }
            Err(InboundError::RateLimited { sender }) => {
                // Caller only learns of this drop through its own timeout
                error!(
                    gateway_id = gateway_id,
                    method = %method,
                    message_id = %message_id,
                    sender = %sender,
                    "Request rate-limited"
                );
            }
            Err(e) => {
                error!(
                    gateway_id = gateway_id,
                    method = %method,
                    message_id = %message_id,
                    error = %e,
                    "Dropping gateway message"
                );
            }
        }
    }
}

impl Drop for OutgoingConnectorHandler {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_task.get_mut().take() {
            handle.abort();
        }
    }
}

/// Lexicographically first gateway id, if any
pub fn select_gateway(gateway_ids: Vec<String>) -> Option<String> {
    gateway_ids.into_iter().min()
}

/// Abandons a registered request on every exit path that did not resolve it
struct PendingGuard<'a> {
    correlator: &'a ResponseCorrelator,
    id: &'a RequestId,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn new(correlator: &'a ResponseCorrelator, id: &'a RequestId) -> Self {
        Self {
            correlator,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.abandon(self.id);
        }
    }
}

/// Periodic eviction of expired pending requests and idle limiter state
async fn sweep_loop(
    pending: Arc<ResponseCorrelator>,
    rate_limiter: Arc<dyn SenderRateLimiter>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let removed = pending.remove_expired(interval);
        rate_limiter.retain_recent();
        if removed > 0 {
            debug!(removed = removed, "Swept expired pending requests");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryGatewayConnector;
    use serde_json::json;

    fn handler_with(connector: Arc<InMemoryGatewayConnector>) -> Arc<OutgoingConnectorHandler> {
        OutgoingConnectorHandler::new(connector, ConnectorConfig::default(), "web_api_target")
            .unwrap()
    }

    fn response(id: &str, method: &str, payload: serde_json::Value) -> GatewayMessage {
        GatewayMessage::new(MessageBody::response(id, method, "0xsender", payload))
    }

    #[test]
    fn test_select_gateway_sorted_first() {
        let ids = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        assert_eq!(select_gateway(ids), Some("a".to_string()));
        assert_eq!(select_gateway(Vec::new()), None);
    }

    #[test]
    fn test_invalid_method_rejected() {
        let connector = Arc::new(InMemoryGatewayConnector::new("don", ["a"]));
        let result =
            OutgoingConnectorHandler::new(connector, ConnectorConfig::default(), "eth_call");
        assert!(matches!(
            result,
            Err(ConnectorError::Config(ConfigError::InvalidMethod(_)))
        ));
    }

    #[test]
    fn test_invalid_rate_limit_rejected() {
        let connector = Arc::new(InMemoryGatewayConnector::new("don", ["a"]));
        let mut config = ConnectorConfig::default();
        config.rate_limit.per_sender.max_events = 0;
        let result = OutgoingConnectorHandler::new(connector, config, "web_api_target");
        assert!(matches!(
            result,
            Err(ConnectorError::Config(ConfigError::InvalidRateLimit(_)))
        ));
    }

    #[test]
    fn test_name_includes_method() {
        let handler = handler_with(Arc::new(InMemoryGatewayConnector::new("don", ["a"])));
        assert_eq!(handler.name(), "OutgoingConnectorHandler.web_api_target");
        assert_eq!(handler.method(), Method::WebApiTarget);
    }

    #[test]
    fn test_inbound_unsupported_method() {
        let handler = handler_with(Arc::new(InMemoryGatewayConnector::new("don", ["a"])));
        let result = handler.process_gateway_message(response("m1", "eth_call", json!({})));
        assert_eq!(result, Err(InboundError::UnsupportedMethod("eth_call".into())));
    }

    #[test]
    fn test_inbound_malformed_payload() {
        let handler = handler_with(Arc::new(InMemoryGatewayConnector::new("don", ["a"])));
        let result =
            handler.process_gateway_message(response("m1", "web_api_target", json!([1, 2, 3])));
        assert!(matches!(result, Err(InboundError::MalformedResponse(_))));
    }

    #[test]
    fn test_inbound_unknown_id() {
        let handler = handler_with(Arc::new(InMemoryGatewayConnector::new("don", ["a"])));
        let result = handler.process_gateway_message(response("nope", "web_api_target", json!({})));
        assert_eq!(result, Err(InboundError::UnknownRequestId(RequestId::new("nope"))));
    }

    #[test]
    fn test_any_supported_method_resolves() {
        let handler = handler_with(Arc::new(InMemoryGatewayConnector::new("don", ["a"])));
        let id = RequestId::new("m1");
        let mut rx = handler
            .pending
            .register(&id, Method::WebApiTarget.as_str(), Duration::from_secs(5))
            .unwrap();

        let result = handler.process_gateway_message(response("m1", "workflow_syncer", json!({})));
        assert_eq!(result, Ok(id));
        assert_eq!(rx.try_recv().unwrap().body.method, "workflow_syncer");
    }

    #[tokio::test]
    async fn test_health_report_follows_lifecycle() {
        let handler = handler_with(Arc::new(InMemoryGatewayConnector::new("don", ["a"])));
        let name = handler.name().to_string();

        assert_eq!(handler.health_report()[&name], HealthStatus::NotStarted);
        handler.start().await.unwrap();
        assert_eq!(handler.health_report()[&name], HealthStatus::Healthy);
        assert!(handler.healthy().is_ok());
        handler.close().await.unwrap();
        assert_eq!(handler.health_report()[&name], HealthStatus::Stopped);
        assert!(matches!(handler.healthy(), Err(LifecycleError::Stopped(_))));
    }

    #[tokio::test]
    async fn test_close_aborts_sweep_task() {
        let handler = handler_with(Arc::new(InMemoryGatewayConnector::new("don", ["a"])));
        handler.start().await.unwrap();
        assert!(handler.sweep_task.lock().is_some());
        handler.close().await.unwrap();
        assert!(handler.sweep_task.lock().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_evicts_stale_entries() {
        let connector = Arc::new(InMemoryGatewayConnector::new("don", ["a"]));
        let mut config = ConnectorConfig::default();
        config.sweep.interval = Duration::from_millis(50);
        let handler =
            OutgoingConnectorHandler::new(connector, config, "web_api_target").unwrap();
        handler.start().await.unwrap();

        let id = RequestId::new("orphan");
        let _rx = handler
            .pending
            .register(&id, Method::WebApiTarget.as_str(), Duration::from_millis(10))
            .unwrap();

        // Expiry is 10ms plus one 50ms sweep interval of grace
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(handler.pending.is_pending(&id));

        tokio::time::sleep(Duration::from_millis(90)).await;
        assert!(!handler.pending.is_pending(&id));
        handler.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_handler_rejects_requests() {
        let connector = Arc::new(InMemoryGatewayConnector::new("don", ["a"]));
        let handler = handler_with(connector.clone());
        handler.start().await.unwrap();
        handler.close().await.unwrap();

        let result = handler
            .handle_single_node_request(
                RequestId::new("late"),
                OutboundRequest::with_body(Vec::new(), 1_000),
            )
            .await;

        assert!(matches!(
            result,
            Err(ConnectorError::Lifecycle(LifecycleError::Stopped(name))) if name == handler.name()
        ));
        assert_eq!(connector.send_count(), 0);
        assert_eq!(handler.pending_count(), 0);
    }
}
