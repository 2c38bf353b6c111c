//! Request sensitivity classification and transport routing
//!
//! Only first-party traffic (the application's own background context) is
//! ever proxied. Everything else goes direct whatever the mode.

use serde::{Deserialize, Serialize};

use crate::{PrivacyMode, PrivacyProxyConfig, ProxyTransport, RequestSensitivity};

/// Path fragments of value-transfer and account-revealing calls
const HIGH_SENSITIVITY_MARKERS: &[&str] = &[
    "/broadcast",
    "senduseroperation",
    "sendrawtransaction",
    "/multi-hints",
    "/portfolio",
];

/// RPC paths and infrastructure providers
const MEDIUM_SENSITIVITY_MARKERS: &[&str] = &["/rpc", "infura", "alchemy", "quicknode"];

/// Tab id the browser reports for background (non-tab) requests
pub const BACKGROUND_TAB_ID: i64 = -1;

/// Classify a request target. First matching tier wins.
pub fn classify(url: &str) -> RequestSensitivity {
    let url = url.to_lowercase();

    if HIGH_SENSITIVITY_MARKERS.iter().any(|m| url.contains(m)) {
        RequestSensitivity::High
    } else if MEDIUM_SENSITIVITY_MARKERS.iter().any(|m| url.contains(m)) {
        RequestSensitivity::Medium
    } else {
        RequestSensitivity::Low
    }
}

/// Whether a request of this sensitivity should get its own circuit.
///
/// Advisory only; nothing isolates circuits yet.
pub fn should_isolate_circuit(sensitivity: RequestSensitivity) -> bool {
    sensitivity == RequestSensitivity::High
}

/// Who issued a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOrigin {
    /// Request URL (used for logging and classification only)
    pub url: String,
    /// URL of the document or context that issued the request
    pub origin_url: Option<String>,
    /// Browser tab id; `-1` for background contexts
    pub tab_id: Option<i64>,
}

/// Picks a transport per request
#[derive(Debug, Clone)]
pub struct RequestRouter {
    /// Base URL of the application's own context
    app_base_url: String,
    config: PrivacyProxyConfig,
}

impl RequestRouter {
    pub fn new(app_base_url: impl Into<String>, config: PrivacyProxyConfig) -> Self {
        Self {
            app_base_url: app_base_url.into(),
            config,
        }
    }

    pub fn config(&self) -> &PrivacyProxyConfig {
        &self.config
    }

    /// Whether the request comes from the application's background context
    pub fn is_first_party(&self, origin: &RequestOrigin) -> bool {
        if self.app_base_url.is_empty() {
            return false;
        }
        let from_app = origin
            .origin_url
            .as_deref()
            .is_some_and(|o| o.starts_with(&self.app_base_url));
        from_app && origin.tab_id == Some(BACKGROUND_TAB_ID)
    }

    /// Choose a transport for a request under the given mode
    pub fn route(&self, origin: &RequestOrigin, mode: PrivacyMode) -> ProxyTransport {
        if !self.is_first_party(origin) {
            return ProxyTransport::Direct;
        }

        match mode {
            PrivacyMode::Direct => ProxyTransport::Direct,
            PrivacyMode::Tor => self.config.tor_transport(),
            PrivacyMode::Nym => self.config.nym_transport(),
        }
    }
}
