//! Privacy mode service
//!
//! Owns the current [`PrivacyMode`], persists it to the status store and
//! notifies subscribers (the connection monitor among them) on change.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;
use tracing::{debug, info};

use onionlens_core::{
    classify, should_isolate_circuit, PrivacyMode, PrivacyProxyConfig, ProxyTransport, RequestOrigin,
    RequestRouter, RequestSensitivity,
};

use crate::store::{get_json, put_json, SharedStore, StoreError, MODE_KEY};

/// Current privacy mode plus request routing
pub struct PrivacyService {
    router: RequestRouter,
    store: SharedStore,
    mode: watch::Sender<PrivacyMode>,
    /// Serializes persist-then-notify so store and subscribers agree
    write_lock: Mutex<()>,
    initialized: AtomicBool,
}

impl PrivacyService {
    /// Create the service. The mode starts as configured until [`init`](Self::init).
    pub fn new(app_base_url: impl Into<String>, config: PrivacyProxyConfig, store: SharedStore) -> Self {
        let (mode, _) = watch::channel(config.mode);
        Self {
            router: RequestRouter::new(app_base_url, config),
            store,
            mode,
            write_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
        }
    }

    /// Load the persisted mode. Only the first call reads the store.
    pub fn init(&self) -> PrivacyMode {
        let _write = self.write_lock.lock();
        if self.initialized.swap(true, Ordering::SeqCst) {
            return self.mode();
        }

        match get_json::<PrivacyMode>(self.store.as_ref(), MODE_KEY) {
            Some(mode) => {
                debug!("Restored privacy mode: {}", mode);
                self.mode.send_if_modified(|current| {
                    let changed = *current != mode;
                    *current = mode;
                    changed
                });
            }
            None => debug!("No stored privacy mode, using {}", self.mode()),
        }

        self.mode()
    }

    /// Switch modes. The store is written before subscribers hear of it.
    pub fn set_mode(&self, mode: PrivacyMode) -> Result<(), StoreError> {
        let _write = self.write_lock.lock();
        put_json(self.store.as_ref(), MODE_KEY, &mode)?;
        self.initialized.store(true, Ordering::SeqCst);

        let previous = self.mode.send_replace(mode);
        if previous != mode {
            info!("Privacy mode changed: {} -> {}", previous, mode);
        }
        Ok(())
    }

    pub fn mode(&self) -> PrivacyMode {
        *self.mode.borrow()
    }

    /// Copy of the proxy configuration carrying the current mode
    pub fn config(&self) -> PrivacyProxyConfig {
        PrivacyProxyConfig {
            mode: self.mode(),
            ..self.router.config().clone()
        }
    }

    /// Receive mode changes
    pub fn subscribe(&self) -> watch::Receiver<PrivacyMode> {
        self.mode.subscribe()
    }

    /// Transport for a request under the current mode
    pub fn route(&self, origin: &RequestOrigin) -> ProxyTransport {
        let transport = self.router.route(origin, self.mode());
        debug!(url = %origin.url, %transport, "Routed request");
        transport
    }

    pub fn classify(&self, url: &str) -> RequestSensitivity {
        classify(url)
    }

    /// Whether a request to `url` would warrant its own circuit
    pub fn should_isolate_circuit(&self, url: &str) -> bool {
        should_isolate_circuit(classify(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStatusStore, StatusStore};
    use onionlens_core::BACKGROUND_TAB_ID;
    use serde_json::Value;
    use std::sync::Arc;

    const APP: &str = "chrome-extension://wallet/";

    fn background(url: &str) -> RequestOrigin {
        RequestOrigin {
            url: url.to_string(),
            origin_url: Some(format!("{}sw.js", APP)),
            tab_id: Some(BACKGROUND_TAB_ID),
        }
    }

    #[test]
    fn test_init_restores_stored_mode() {
        let store = MemoryStatusStore::shared();
        store.put(MODE_KEY, Value::String("tor".to_string())).unwrap();

        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), store);
        assert_eq!(service.mode(), PrivacyMode::Direct);
        assert_eq!(service.init(), PrivacyMode::Tor);
        assert_eq!(service.config().mode, PrivacyMode::Tor);
    }

    #[test]
    fn test_init_defaults_without_stored_mode() {
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), MemoryStatusStore::shared());
        assert_eq!(service.init(), PrivacyMode::Direct);
    }

    #[test]
    fn test_init_reads_store_once() {
        let store = MemoryStatusStore::shared();
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), store.clone());
        service.init();

        store.put(MODE_KEY, Value::String("nym".to_string())).unwrap();
        assert_eq!(service.init(), PrivacyMode::Direct);
    }

    #[test]
    fn test_set_mode_persists_and_notifies() {
        let store = MemoryStatusStore::shared();
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), store.clone());
        let mut modes = service.subscribe();

        service.set_mode(PrivacyMode::Tor).unwrap();

        assert!(modes.has_changed().unwrap());
        assert_eq!(*modes.borrow_and_update(), PrivacyMode::Tor);
        assert_eq!(store.get(MODE_KEY), Some(Value::String("tor".to_string())));
    }

    #[test]
    fn test_route_follows_mode() {
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), MemoryStatusStore::shared());
        let request = background("https://mainnet.infura.io/v3/key");

        assert_eq!(service.route(&request), ProxyTransport::Direct);

        service.set_mode(PrivacyMode::Tor).unwrap();
        assert_eq!(
            service.route(&request),
            ProxyTransport::Socks {
                host: "127.0.0.1".to_string(),
                port: 9050
            }
        );

        service.set_mode(PrivacyMode::Nym).unwrap();
        assert_eq!(service.route(&request).to_string(), "socks5h://127.0.0.1:1080");
    }

    #[test]
    fn test_page_traffic_never_proxied() {
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), MemoryStatusStore::shared());
        service.set_mode(PrivacyMode::Tor).unwrap();

        let page = RequestOrigin {
            url: "https://mainnet.infura.io/v3/key".to_string(),
            origin_url: Some("https://dapp.example".to_string()),
            tab_id: Some(7),
        };
        assert_eq!(service.route(&page), ProxyTransport::Direct);
    }

    #[test]
    fn test_isolation_advice() {
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), MemoryStatusStore::shared());
        assert!(service.should_isolate_circuit("https://relay.example/broadcast"));
        assert!(!service.should_isolate_circuit("https://eth.example/rpc"));
        assert_eq!(service.classify("https://eth.example/rpc"), RequestSensitivity::Medium);
    }

    #[test]
    fn test_concurrent_set_mode_keeps_store_and_subscribers_in_step() {
        let store = MemoryStatusStore::shared();
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), store.clone());
        let modes = [PrivacyMode::Tor, PrivacyMode::Nym, PrivacyMode::Direct];

        std::thread::scope(|scope| {
            for (i, mode) in modes.iter().enumerate() {
                let service = &service;
                scope.spawn(move || {
                    for n in 0..200 {
                        let next = if n % 2 == 0 { *mode } else { modes[(i + 1) % modes.len()] };
                        service.set_mode(next).unwrap();
                    }
                });
            }
        });

        let stored: PrivacyMode = get_json(store.as_ref(), MODE_KEY).unwrap();
        assert_eq!(stored, service.mode());
    }

    struct FailingStore;

    impl StatusStore for FailingStore {
        fn put(&self, _key: &str, _value: Value) -> Result<(), StoreError> {
            Err(StoreError::Backend("read-only".to_string()))
        }

        fn get(&self, _key: &str) -> Option<Value> {
            None
        }
    }

    #[test]
    fn test_failed_persist_keeps_mode() {
        let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), Arc::new(FailingStore));
        let modes = service.subscribe();

        assert!(service.set_mode(PrivacyMode::Tor).is_err());
        assert_eq!(service.mode(), PrivacyMode::Direct);
        assert!(!modes.has_changed().unwrap());
    }
}
