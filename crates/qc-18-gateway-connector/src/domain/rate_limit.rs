//! Inbound rate limiting per sender identity (GCRA via `governor`).
//!
//! Two quotas apply to every inbound message:
//! - per sender: at most `per_sender.max_events` within `per_sender.window`
//! - global: at most `global.max_events` within `global.window`
//!
//! The per-sender quota is checked first so that a sender over its limit
//! does not consume global capacity.

use crate::domain::config::{ConfigError, QuotaConfig, RateLimitConfig};
use crate::ports::SenderRateLimiter;
use governor::{DefaultDirectRateLimiter, DefaultKeyedRateLimiter, Quota};
use std::collections::HashSet;
use std::num::NonZeroU32;
use tracing::debug;

/// Per-sender plus global rate limiter
pub struct RateLimiter {
    enabled: bool,
    global: DefaultDirectRateLimiter,
    per_sender: DefaultKeyedRateLimiter<String>,
    exempt: HashSet<String>,
}

impl RateLimiter {
    /// Build a limiter, rejecting zero limits or windows
    pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
        let global = quota(&config.global, "global")?;
        let per_sender = quota(&config.per_sender, "per_sender")?;

        Ok(Self {
            enabled: config.enabled,
            global: DefaultDirectRateLimiter::direct(global),
            per_sender: DefaultKeyedRateLimiter::keyed(per_sender),
            exempt: config.exempt_senders.iter().cloned().collect(),
        })
    }

    /// Number of senders with live limiter state
    pub fn sender_count(&self) -> usize {
        self.per_sender.len()
    }
}

impl SenderRateLimiter for RateLimiter {
    fn allow(&self, sender: &str) -> bool {
        if !self.enabled || self.exempt.contains(sender) {
            return true;
        }

        if self.per_sender.check_key(&sender.to_string()).is_err() {
            debug!(sender = sender, "Per-sender rate limit exceeded");
            return false;
        }

        if self.global.check().is_err() {
            debug!(sender = sender, "Global rate limit exceeded");
            return false;
        }

        true
    }

    fn retain_recent(&self) {
        self.per_sender.retain_recent();
    }
}

fn quota(config: &QuotaConfig, scope: &str) -> Result<Quota, ConfigError> {
    let burst = NonZeroU32::new(config.max_events).ok_or_else(|| {
        ConfigError::InvalidRateLimit(format!("{scope}.max_events cannot be 0"))
    })?;
    let interval = config.replenish_interval().ok_or_else(|| {
        ConfigError::InvalidRateLimit(format!("{scope}.window is invalid"))
    })?;
    let quota = Quota::with_period(interval).ok_or_else(|| {
        ConfigError::InvalidRateLimit(format!("{scope}.window is invalid"))
    })?;
    Ok(quota.allow_burst(burst))
}
