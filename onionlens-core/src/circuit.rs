//! Circuits and relay hops as reported by `GETINFO circuit-status`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{FINGERPRINT_PREFIX_LEN, MIN_REPORTABLE_HOPS, UNKNOWN_NICKNAME};

/// One relay hop in a circuit path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitNode {
    /// Relay identity fingerprint (hex, without the leading `$`)
    pub fingerprint: String,
    /// Relay nickname
    pub nickname: String,
    /// Relay address, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Relay country code, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Capability flags (Guard, Exit, Fast, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl CircuitNode {
    pub fn new(fingerprint: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            nickname: nickname.into(),
            ip_address: None,
            country: None,
            flags: Vec::new(),
        }
    }

    /// Parse a single `$FINGERPRINT~Nickname` hop token.
    ///
    /// A missing nickname becomes `"Unknown"`; a missing fingerprint is kept
    /// as an empty string so the rest of the path survives.
    pub fn from_hop(token: &str) -> Self {
        let (fingerprint, nickname) = match token.split_once('~') {
            Some((fp, nick)) => (fp, nick),
            None => (token, ""),
        };

        let nickname = if nickname.is_empty() {
            UNKNOWN_NICKNAME
        } else {
            nickname
        };

        Self::new(fingerprint.trim_start_matches('$'), nickname)
    }

    /// Short display form: `Nickname (AAAA1111...)`
    pub fn summary(&self) -> String {
        let prefix: String = self.fingerprint.chars().take(FINGERPRINT_PREFIX_LEN).collect();
        format!("{} ({}...)", self.nickname, prefix)
    }
}

/// Circuit status token
///
/// Tokens this crate does not know are carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitStatus {
    Launched,
    Built,
    GuardWait,
    Extended,
    Failed,
    Closed,
    Other(String),
}

impl CircuitStatus {
    pub fn parse(token: &str) -> Self {
        match token {
            "LAUNCHED" => Self::Launched,
            "BUILT" => Self::Built,
            "GUARD_WAIT" => Self::GuardWait,
            "EXTENDED" => Self::Extended,
            "FAILED" => Self::Failed,
            "CLOSED" => Self::Closed,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Launched => "LAUNCHED",
            Self::Built => "BUILT",
            Self::GuardWait => "GUARD_WAIT",
            Self::Extended => "EXTENDED",
            Self::Failed => "FAILED",
            Self::Closed => "CLOSED",
            Self::Other(token) => token,
        }
    }
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A circuit from one `circuit-status` reply
///
/// Circuits are rebuilt from scratch on every poll and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Circuit {
    /// Daemon-assigned circuit id
    pub id: String,
    /// Circuit status
    pub status: CircuitStatus,
    /// Hops, entry first
    pub path: Vec<CircuitNode>,
    /// `BUILD_FLAGS` tags
    pub build_flags: Vec<String>,
    /// `PURPOSE` tag
    pub purpose: String,
    /// `TIME_CREATED`, or the poll time when the daemon omitted it
    pub time_created: DateTime<Utc>,
}

impl Circuit {
    /// Whether this circuit can be reported as an entry/middle/exit path
    pub fn is_eligible(&self) -> bool {
        self.status == CircuitStatus::Built && self.path.len() >= MIN_REPORTABLE_HOPS
    }
}
