//! Streams as reported by `GETINFO stream-status`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stream status token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamStatus {
    New,
    NewResolve,
    Remap,
    SentConnect,
    SentResolve,
    Succeeded,
    Failed,
    Closed,
    Detached,
    Other(String),
}

impl StreamStatus {
    pub fn parse(token: &str) -> Self {
        match token {
            "NEW" => Self::New,
            "NEWRESOLVE" => Self::NewResolve,
            "REMAP" => Self::Remap,
            "SENTCONNECT" => Self::SentConnect,
            "SENTRESOLVE" => Self::SentResolve,
            "SUCCEEDED" => Self::Succeeded,
            "FAILED" => Self::Failed,
            "CLOSED" => Self::Closed,
            "DETACHED" => Self::Detached,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::New => "NEW",
            Self::NewResolve => "NEWRESOLVE",
            Self::Remap => "REMAP",
            Self::SentConnect => "SENTCONNECT",
            Self::SentResolve => "SENTRESOLVE",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Closed => "CLOSED",
            Self::Detached => "DETACHED",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stream attached (or attaching) to a circuit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub stream_id: String,
    pub status: StreamStatus,
    /// Id of the circuit carrying this stream
    pub circuit_id: String,
    /// `host:port` the stream connects to
    pub target: String,
}

impl StreamRecord {
    pub fn is_succeeded(&self) -> bool {
        self.status == StreamStatus::Succeeded
    }
}
