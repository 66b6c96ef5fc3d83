//! Domain types for the gateway connector.
//!
//! Configuration, errors, envelopes, the response correlator and the
//! inbound rate limiter.

pub mod config;
pub mod correlation;
pub mod error;
pub mod methods;
pub mod pending;
pub mod rate_limit;
pub mod types;

// Re-exports for convenience
pub use config::{ConfigError, ConnectorConfig, QuotaConfig, RateLimitConfig, SweepConfig, TimeoutConfig};
pub use correlation::RequestId;
pub use error::{ConnectorError, InboundError, LifecycleError};
pub use methods::Method;
pub use pending::{CorrelatorStats, ResponseCorrelator};
pub use rate_limit::RateLimiter;
pub use types::*;
