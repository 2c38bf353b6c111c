//! Application configuration
//!
//! Code defaults, optionally overridden by a TOML file:
//!
//! ```toml
//! app_base_url = "chrome-extension://abcdef/"
//!
//! [tor]
//! control_addr = "127.0.0.1:9051"
//!
//! [control]
//! password = "hunter2"
//! stream_selection = "highest_stream_id"
//!
//! [monitor]
//! interval_secs = 30
//!
//! [privacy]
//! mode = "tor"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use onionlens_core::{PrivacyProxyConfig, SharedClock, StreamSelection};
use onionlens_tor::{authenticator_for, HttpProbe, TcpControlTransport, TorConfig, TorControlClient, TorError};

use crate::MonitorConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Control-session settings
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control-port password; `None` authenticates with no credentials
    pub password: Option<String>,
    pub stream_selection: StreamSelection,
}

impl std::fmt::Debug for ControlConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlConfig")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("stream_selection", &self.stream_selection)
            .finish()
    }
}

/// Full application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the application's own background context
    pub app_base_url: String,
    pub tor: TorConfig,
    pub control: ControlConfig,
    pub monitor: MonitorConfig,
    pub privacy: PrivacyProxyConfig,
}

impl AppConfig {
    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Control client over TCP for the configured control port
    pub fn control_client(&self, clock: SharedClock) -> TorControlClient {
        TorControlClient::new(
            TcpControlTransport::from_config(&self.tor),
            authenticator_for(self.control.password.as_deref()),
            clock,
        )
        .with_stream_selection(self.control.stream_selection)
    }

    /// Egress probe through the configured SOCKS port
    pub fn probe(&self) -> Result<HttpProbe, TorError> {
        HttpProbe::new(&self.tor)
    }
}
