//! Egress probe
//!
//! Confirms traffic actually leaves through Tor, independently of the
//! control port, by asking check.torproject.org which address it sees.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::{create_socks_client, create_tor_client, TorConfig, TorError};

/// Outcome of one egress check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// The check endpoint answered
    pub reachable: bool,
    /// The endpoint saw a Tor exit address
    pub confirmed_tor: bool,
    /// Address the endpoint saw, when reported
    pub observed_address: Option<String>,
}

/// Probe failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Failed(String),

    #[error("Connectivity check timed out after {0:?}")]
    Timeout(Duration),
}

/// Checks whether egress goes through Tor
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> Result<ProbeReport, ProbeError>;
}

pub type SharedProbe = Arc<dyn ConnectivityProbe>;

/// check.torproject.org `/api/ip` response
#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(rename = "IsTor", default)]
    is_tor: bool,
    #[serde(rename = "IP")]
    ip: Option<String>,
}

/// Parse a check.torproject.org `/api/ip` body
pub fn parse_check_response(body: &str) -> Result<ProbeReport, ProbeError> {
    let parsed: CheckResponse = serde_json::from_str(body)
        .map_err(|e| ProbeError::Failed(format!("Malformed check response: {}", e)))?;

    Ok(ProbeReport {
        reachable: true,
        confirmed_tor: parsed.is_tor,
        observed_address: parsed.ip.filter(|ip| !ip.is_empty()),
    })
}

/// Probe over HTTP through a SOCKS endpoint
pub struct HttpProbe {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpProbe {
    /// Probe through the configured Tor SOCKS port
    pub fn new(config: &TorConfig) -> Result<Self, TorError> {
        Ok(Self {
            client: create_tor_client(config)?,
            url: config.check_url.clone(),
            timeout: config.check_timeout(),
        })
    }

    /// Probe through an arbitrary SOCKS endpoint
    pub fn via(socks_addr: &str, url: &str, timeout: Duration) -> Result<Self, TorError> {
        Ok(Self {
            client: create_socks_client(socks_addr, timeout)?,
            url: url.to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> Result<ProbeReport, ProbeError> {
        debug!("Checking egress via {}", self.url);

        let response = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::Failed(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(ProbeError::Failed(format!("HTTP {}", response.status().as_u16())));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProbeError::Failed(e.to_string()))?;

        let report = parse_check_response(&body)?;
        debug!(is_tor = report.confirmed_tor, "Egress check answered");
        Ok(report)
    }
}
