//! Privacy modes, request sensitivity and proxy configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How first-party traffic leaves the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyMode {
    #[default]
    Direct,
    Tor,
    Nym,
}

impl PrivacyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Tor => "tor",
            Self::Nym => "nym",
        }
    }
}

impl fmt::Display for PrivacyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown privacy mode: {0}")]
pub struct UnknownModeError(pub String);

impl FromStr for PrivacyMode {
    type Err = UnknownModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "tor" => Ok(Self::Tor),
            "nym" => Ok(Self::Nym),
            other => Err(UnknownModeError(other.to_string())),
        }
    }
}

/// How much a request reveals about the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestSensitivity {
    Low,
    Medium,
    High,
}

impl fmt::Display for RequestSensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        })
    }
}

/// Where a request should be sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProxyTransport {
    Direct,
    Socks { host: String, port: u16 },
}

impl fmt::Display for ProxyTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Socks { host, port } => write!(f, "socks5h://{}:{}", host, port),
        }
    }
}

/// Proxy endpoints for each privacy mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyProxyConfig {
    pub mode: PrivacyMode,
    pub tor_socks_host: String,
    pub tor_socks_port: u16,
    pub nym_socks_host: String,
    pub nym_socks_port: u16,
}

impl Default for PrivacyProxyConfig {
    fn default() -> Self {
        Self {
            mode: PrivacyMode::Direct,
            tor_socks_host: "127.0.0.1".to_string(),
            tor_socks_port: 9050,
            nym_socks_host: "127.0.0.1".to_string(),
            nym_socks_port: 1080,
        }
    }
}

impl PrivacyProxyConfig {
    /// SOCKS endpoint for Tor
    pub fn tor_transport(&self) -> ProxyTransport {
        ProxyTransport::Socks {
            host: self.tor_socks_host.clone(),
            port: self.tor_socks_port,
        }
    }

    /// SOCKS endpoint for Nym
    pub fn nym_transport(&self) -> ProxyTransport {
        ProxyTransport::Socks {
            host: self.nym_socks_host.clone(),
            port: self.nym_socks_port,
        }
    }
}
