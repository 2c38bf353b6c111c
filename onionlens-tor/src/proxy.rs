//! Tor endpoints and the SOCKS5h HTTP client
//!
//! Creates HTTP clients that route through a local SOCKS proxy (Tor or Nym).

use reqwest::{Client, Proxy};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Tor endpoint configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TorConfig {
    /// SOCKS5 proxy address (default: socks5h://127.0.0.1:9050)
    pub socks_addr: String,
    /// Control port address (default: 127.0.0.1:9051)
    pub control_addr: String,
    /// Bound on one control command round trip, in seconds
    pub control_timeout_secs: u64,
    /// Egress check endpoint
    pub check_url: String,
    /// Bound on one egress check, in seconds
    pub check_timeout_secs: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            socks_addr: "socks5h://127.0.0.1:9050".to_string(),
            control_addr: "127.0.0.1:9051".to_string(),
            control_timeout_secs: 5,
            check_url: "https://check.torproject.org/api/ip".to_string(),
            check_timeout_secs: 10,
        }
    }
}

impl TorConfig {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

/// Errors building proxied HTTP clients
#[derive(Debug, Error)]
pub enum TorError {
    #[error("Failed to build Tor client: {0}")]
    ClientBuild(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxy(String),
}

/// User agents for rotation
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.7; rv:137.0) Gecko/20100101 Firefox/137.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
];

/// Get a random user agent
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::thread_rng().gen_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

/// Create an HTTP client that sends everything through `socks_addr`
pub fn create_socks_client(socks_addr: &str, timeout: Duration) -> Result<Client, TorError> {
    if !socks_addr.starts_with("socks5") {
        return Err(TorError::InvalidProxy(socks_addr.to_string()));
    }

    let proxy = Proxy::all(socks_addr).map_err(|e| TorError::ClientBuild(e.to_string()))?;

    Client::builder()
        .proxy(proxy)
        .timeout(timeout)
        .user_agent(random_user_agent())
        .build()
        .map_err(|e| TorError::ClientBuild(e.to_string()))
}

/// Create a Tor-enabled HTTP client
pub fn create_tor_client(config: &TorConfig) -> Result<Client, TorError> {
    create_socks_client(&config.socks_addr, config.check_timeout())
}
