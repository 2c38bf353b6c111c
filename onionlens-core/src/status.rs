//! Resolved circuit details and the published connection snapshot

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::CircuitNode;

/// Entry/middle/exit hops of the circuit currently carrying traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitDetails {
    pub entry_node: Option<CircuitNode>,
    pub middle_node: Option<CircuitNode>,
    pub exit_node: Option<CircuitNode>,
    pub circuit_id: String,
    /// Time elapsed since the circuit was created
    pub build_time: Duration,
}

/// Snapshot of Tor connectivity published by the connection monitor
///
/// Always replaced as a whole; readers hold copies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Egress probe reached its endpoint
    pub connected: bool,
    /// Egress probe confirmed traffic leaves through Tor
    pub circuit_established: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub middle_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub last_checked: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// Whether any hop summary is present
    pub fn has_circuit_details(&self) -> bool {
        self.entry_node.is_some() || self.middle_node.is_some() || self.exit_node.is_some()
    }

    /// Short label for status badges
    pub fn label(&self) -> &'static str {
        if !self.connected {
            "Tor: Disconnected"
        } else if !self.circuit_established {
            "Tor: Connecting..."
        } else {
            "Tor: Active"
        }
    }

    /// Copy hop summaries from resolved circuit details
    pub fn with_circuit(mut self, details: Option<&CircuitDetails>) -> Self {
        if let Some(details) = details {
            self.entry_node = details.entry_node.as_ref().map(CircuitNode::summary);
            self.middle_node = details.middle_node.as_ref().map(CircuitNode::summary);
            self.exit_node = details.exit_node.as_ref().map(CircuitNode::summary);
        }
        self
    }
}
