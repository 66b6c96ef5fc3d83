//! QC-18 Gateway Connector - outgoing request/response correlation.
//!
//! Sends a request to one gateway node and suspends the caller until the
//! correlated response comes back through the inbound callback, or until the
//! request deadline expires.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                       GATEWAY CONNECTOR (qc-18)                             │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │   caller                                                                    │
//! │     │ handle_single_node_request(id, request)                               │
//! │     ▼                                                                       │
//! │  ┌────────────────────────────┐      register(id)   ┌─────────────────────┐ │
//! │  │  OutgoingConnectorHandler  │ ──────────────────► │  ResponseCorrelator │ │
//! │  │  (timeout, envelope,       │                     │  id → oneshot slot  │ │
//! │  │   sorted-first gateway)    │ ◄────────────────── │                     │ │
//! │  └─────────────┬──────────────┘    slot resolved    └──────────▲──────────┘ │
//! │                │ sign_and_send_to_gateway                      │ resolve    │
//! │                ▼                                               │            │
//! │  ┌────────────────────────────┐   handle_gateway_message  ┌────┴─────────┐  │
//! │  │     GatewayConnector       │ ────────────────────────► │ RateLimiter  │  │
//! │  │     (transport port)       │                           │ (per sender) │  │
//! │  └────────────────────────────┘                           └──────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use qc_18_gateway_connector::{ConnectorConfig, OutgoingConnectorHandler, RequestId};
//!
//! let handler = OutgoingConnectorHandler::new(connector, ConnectorConfig::default(), "web_api_target")?;
//! handler.start().await?;
//! let response = handler
//!     .handle_single_node_request(RequestId::generate(), request)
//!     .await?;
//! ```
//!
//! # Failure model
//!
//! - One send attempt per call, no retries and no failover to another gateway
//! - Dispatch errors are returned to the caller
//! - Inbound errors (rate limited, unsupported method, malformed payload,
//!   unknown id) are logged and dropped; the caller observes its own timeout

#![warn(clippy::all)]
#![deny(unsafe_code)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod domain;
pub mod lifecycle;
pub mod ports;
pub mod service;
pub mod telemetry;

// Re-exports for public API
pub use domain::config::{ConfigError, ConnectorConfig, QuotaConfig, RateLimitConfig};
pub use domain::correlation::RequestId;
pub use domain::error::{ConnectorError, InboundError, LifecycleError};
pub use domain::methods::Method;
pub use domain::pending::{CorrelatorStats, ResponseCorrelator};
pub use domain::rate_limit::RateLimiter;
pub use domain::types::{GatewayMessage, MessageBody, OutboundRequest, OutboundResponse};
pub use lifecycle::{HealthStatus, ServiceState};
pub use ports::{GatewayConnector, GatewayConnectorHandler, SenderRateLimiter, TransportError};
pub use service::{select_gateway, OutgoingConnectorHandler};
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};
