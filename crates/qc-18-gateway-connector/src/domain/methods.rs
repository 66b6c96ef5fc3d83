//! Gateway method registry.
//!
//! Only these methods are accepted on both the outgoing and the inbound path.
//! Anything else is rejected at construction time (outgoing) or dropped
//! (inbound).

use crate::domain::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Methods a connector handler can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Outbound HTTP call on behalf of a workflow target
    WebApiTarget,
    /// Outbound HTTP call issued from a compute action
    ComputeAction,
    /// Fetch of workflow artifacts by the workflow syncer
    WorkflowSyncer,
}

impl Method {
    /// All supported methods
    pub const ALL: [Method; 3] = [
        Method::WebApiTarget,
        Method::ComputeAction,
        Method::WorkflowSyncer,
    ];

    /// Wire name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::WebApiTarget => "web_api_target",
            Method::ComputeAction => "compute_action",
            Method::WorkflowSyncer => "workflow_syncer",
        }
    }

    /// Check a wire name against the registry
    pub fn is_supported(name: &str) -> bool {
        name.parse::<Method>().is_ok()
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidMethod(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert!(matches!(
            "eth_call".parse::<Method>(),
            Err(ConfigError::InvalidMethod(m)) if m == "eth_call"
        ));
        assert!(!Method::is_supported(""));
        assert!(!Method::is_supported("WEB_API_TARGET"));
        assert!(Method::is_supported("compute_action"));
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&Method::WorkflowSyncer).unwrap();
        assert_eq!(json, "\"workflow_syncer\"");
    }
}
