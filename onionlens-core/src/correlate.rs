//! Stream-to-circuit correlation
//!
//! Finds the circuit carrying the application's traffic from one poll's
//! circuit and stream lists, and reports its entry/middle/exit hops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Circuit, CircuitDetails, CircuitStatus, StreamRecord};

/// Which succeeded stream decides the active circuit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamSelection {
    /// First SUCCEEDED stream in reply order
    #[default]
    FirstSucceeded,
    /// SUCCEEDED stream with the highest id (the most recently opened)
    HighestStreamId,
}

impl StreamSelection {
    fn select<'a>(&self, streams: &'a [StreamRecord]) -> Option<&'a StreamRecord> {
        let mut succeeded = streams.iter().filter(|s| s.is_succeeded());
        match self {
            Self::FirstSucceeded => succeeded.next(),
            Self::HighestStreamId => {
                succeeded.max_by_key(|s| s.stream_id.parse::<u64>().unwrap_or(0))
            }
        }
    }
}

/// Resolve the active circuit for one synchronized poll.
///
/// Returns `None` when no stream has succeeded yet or the circuit it is
/// attached to is not a built circuit with at least three hops.
pub fn correlate(
    circuits: &[Circuit],
    streams: &[StreamRecord],
    now: DateTime<Utc>,
    selection: StreamSelection,
) -> Option<CircuitDetails> {
    let Some(stream) = selection.select(streams) else {
        debug!("No SUCCEEDED streams among {}", streams.len());
        return None;
    };

    let circuit = circuits
        .iter()
        .find(|c| c.id == stream.circuit_id && c.status == CircuitStatus::Built);

    let Some(circuit) = circuit.filter(|c| c.is_eligible()) else {
        debug!(
            circuit_id = %stream.circuit_id,
            "Attached circuit not found or not a built 3-hop circuit"
        );
        return None;
    };

    let build_time = (now - circuit.time_created).to_std().unwrap_or_default();

    Some(CircuitDetails {
        entry_node: circuit.path.first().cloned(),
        middle_node: circuit.path.get(1).cloned(),
        exit_node: circuit.path.get(2).cloned(),
        circuit_id: circuit.id.clone(),
        build_time,
    })
}
