//! Response correlator - maps request ids to single-use delivery slots.
//!
//! Flow:
//! 1. Dispatch calls `register()` before sending and keeps the receiver
//! 2. The request goes out through the transport
//! 3. The inbound callback calls `resolve()` with the gateway's response
//! 4. Dispatch awaits the receiver or gives up at its deadline
//!
//! Map membership decides whether a request is still awaitable: `resolve`,
//! `abandon`, `time_out` and the sweep all remove the entry, so at most one
//! of them can act on a given registration.

use crate::domain::correlation::RequestId;
use crate::domain::error::ConnectorError;
use crate::domain::types::GatewayMessage;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A request waiting for its response
struct PendingRequest {
    /// Capacity-1 delivery slot
    slot: oneshot::Sender<GatewayMessage>,
    created_at: Instant,
    method: &'static str,
    /// Effective timeout (request timeout plus margin)
    timeout: Duration,
}

/// Counters for the correlator
#[derive(Debug, Default)]
pub struct CorrelatorStats {
    /// Total requests registered
    pub total_registered: AtomicU64,
    /// Responses delivered to a waiting caller
    pub total_completed: AtomicU64,
    /// Requests that hit their deadline or were swept
    pub total_timeouts: AtomicU64,
    /// Requests abandoned by the caller (send failure, dropped future)
    pub total_cancelled: AtomicU64,
    /// Responses for ids with no pending entry
    pub total_unknown: AtomicU64,
}

/// Correlates gateway responses with the requests waiting for them.
pub struct ResponseCorrelator {
    pending: DashMap<RequestId, PendingRequest>,
    stats: CorrelatorStats,
}

impl Default for ResponseCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCorrelator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            stats: CorrelatorStats::default(),
        }
    }

    /// Register a pending request and get the receiving end of its slot.
    ///
    /// Fails if `id` is already pending; the existing entry is left intact.
    pub fn register(
        &self,
        id: &RequestId,
        method: &'static str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<GatewayMessage>, ConnectorError> {
        let (slot, rx) = oneshot::channel();

        match self.pending.entry(id.clone()) {
            Entry::Occupied(_) => {
                warn!(message_id = %id, method = method, "Request id already pending");
                return Err(ConnectorError::DuplicateRequestId(id.clone()));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingRequest {
                    slot,
                    created_at: Instant::now(),
                    method,
                    timeout,
                });
            }
        }

        self.stats.total_registered.fetch_add(1, Ordering::Relaxed);
        debug!(
            message_id = %id,
            method = method,
            timeout_ms = timeout.as_millis(),
            "Registered pending request"
        );

        Ok(rx)
    }

    /// Deliver a response to the request registered under `id`.
    ///
    /// Returns true if a waiting caller received it. Unknown ids and callers
    /// that already gave up yield false. Never blocks.
    pub fn resolve(&self, id: &RequestId, message: GatewayMessage) -> bool {
        let Some((_, pending)) = self.pending.remove(id) else {
            self.stats.total_unknown.fetch_add(1, Ordering::Relaxed);
            warn!(message_id = %id, "Response for unknown or expired request id");
            return false;
        };

        let response_time = pending.created_at.elapsed();
        match pending.slot.send(message) {
            Ok(()) => {
                self.stats.total_completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    message_id = %id,
                    method = pending.method,
                    response_time_ms = response_time.as_millis(),
                    "Resolved pending request"
                );
                true
            }
            Err(_) => {
                // Receiver dropped between its deadline and the removal
                self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    message_id = %id,
                    method = pending.method,
                    "Pending request receiver dropped"
                );
                false
            }
        }
    }

    /// Remove a pending request without resolving it.
    ///
    /// A later `resolve` for the same id becomes a no-op.
    pub fn abandon(&self, id: &RequestId) -> bool {
        if self.pending.remove(id).is_some() {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(message_id = %id, "Abandoned pending request");
            true
        } else {
            false
        }
    }

    /// Remove a pending request whose deadline elapsed
    pub fn time_out(&self, id: &RequestId) -> bool {
        if self.pending.remove(id).is_some() {
            self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove entries older than their own timeout plus `grace`.
    ///
    /// The waiting caller owns its deadline; `grace` keeps the sweep from
    /// evicting an entry before the caller's own timer has fired.
    /// Returns the number of entries removed.
    pub fn remove_expired(&self, grace: Duration) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.pending.retain(|id, request| {
            let elapsed = now.saturating_duration_since(request.created_at);
            if elapsed > request.timeout.saturating_add(grace) {
                warn!(
                    message_id = %id,
                    method = request.method,
                    elapsed_ms = elapsed.as_millis(),
                    timeout_ms = request.timeout.as_millis(),
                    "Removing expired pending request"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.stats
                .total_timeouts
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Number of currently pending requests
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn stats(&self) -> &CorrelatorStats {
        &self.stats
    }
}
