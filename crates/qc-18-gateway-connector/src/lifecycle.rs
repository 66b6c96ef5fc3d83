//! Start-once / stop-once lifecycle and health reporting.
//!
//! ```text
//!   ┌─────────┐  try_start   ┌─────────┐  try_stop   ┌─────────┐
//!   │ CREATED │ ───────────► │ STARTED │ ──────────► │ STOPPED │
//!   └─────────┘              └─────────┘             └─────────┘
//!        │ ▲  abort_start                                 ▲
//!        │ └──────────── (failed registration)            │
//!        └────────────────────────────────────────────────┘
//!                         try_stop
//! ```
//!
//! Transitions are compare-and-swap on an atomic, so concurrent callers see
//! each transition fire exactly once. `Stopped` is terminal.

use crate::domain::error::LifecycleError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ServiceState {
    Created = 0,
    Started = 1,
    Stopped = 2,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ServiceState::Created,
            1 => ServiceState::Started,
            _ => ServiceState::Stopped,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceState::Created => write!(f, "created"),
            ServiceState::Started => write!(f, "started"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Health as reported to a process supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Started and serving
    Healthy,
    /// Constructed but never started
    NotStarted,
    /// Stopped (terminal)
    Stopped,
}

impl From<ServiceState> for HealthStatus {
    fn from(state: ServiceState) -> Self {
        match state {
            ServiceState::Created => HealthStatus::NotStarted,
            ServiceState::Started => HealthStatus::Healthy,
            ServiceState::Stopped => HealthStatus::Stopped,
        }
    }
}

/// Atomic three-state lifecycle guard
#[derive(Debug)]
pub struct StateMachine {
    state: AtomicU8,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ServiceState::Created as u8),
        }
    }

    pub fn state(&self) -> ServiceState {
        ServiceState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `Created → Started`. Only one caller ever succeeds.
    pub fn try_start(&self, name: &str) -> Result<(), LifecycleError> {
        match self.transition(ServiceState::Created, ServiceState::Started) {
            Ok(()) => Ok(()),
            Err(ServiceState::Started) => Err(LifecycleError::AlreadyStarted(name.to_string())),
            Err(_) => Err(LifecycleError::Stopped(name.to_string())),
        }
    }

    /// Undo a `try_start` whose start work failed.
    ///
    /// Leaves the state alone if a concurrent stop already won.
    pub fn abort_start(&self) {
        let _ = self.transition(ServiceState::Started, ServiceState::Created);
    }

    /// Move to `Stopped` from any other state.
    ///
    /// Returns true if this call performed the transition, false if the
    /// machine was already stopped.
    pub fn try_stop(&self) -> bool {
        let previous = self
            .state
            .swap(ServiceState::Stopped as u8, Ordering::AcqRel);
        ServiceState::from_u8(previous) != ServiceState::Stopped
    }

    /// Ok while started, otherwise the reason it is not
    pub fn healthy(&self, name: &str) -> Result<(), LifecycleError> {
        match self.state() {
            ServiceState::Started => Ok(()),
            ServiceState::Created => Err(LifecycleError::NotStarted(name.to_string())),
            ServiceState::Stopped => Err(LifecycleError::Stopped(name.to_string())),
        }
    }

    fn transition(&self, from: ServiceState, to: ServiceState) -> Result<(), ServiceState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(ServiceState::from_u8)
    }
}
