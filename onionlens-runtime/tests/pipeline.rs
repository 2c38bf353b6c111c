//! End-to-end: scripted control port and probe through the monitor,
//! privacy service and status store.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

use onionlens_core::{
    ConnectionStatus, FixedClock, PrivacyMode, PrivacyProxyConfig, ProxyTransport, RequestOrigin,
    SharedClock, BACKGROUND_TAB_ID,
};
use onionlens_runtime::{
    get_json, ConnectionMonitor, MemoryStatusStore, MonitorConfig, PrivacyService, SharedStore, STATUS_KEY,
};
use onionlens_tor::testing::{ScriptedProbe, ScriptedTransport};
use onionlens_tor::{authenticator_for, AuthState, ProbeError, TorControlClient};

const CIRCUIT_REPLY: &str = "250+circuit-status=\n\
    123 BUILT $AAAA1111~Guard,$BBBB2222~Mid,$CCCC3333~Exit BUILD_FLAGS=NEED_CAPACITY PURPOSE=GENERAL TIME_CREATED=2024-03-01T09:59:30.000000\n\
    .\n\
    250 OK";
const STREAM_REPLY: &str = "250+stream-status=\n1 SUCCEEDED 123 some-target\n.\n250 OK";

const APP: &str = "chrome-extension://wallet/";

fn clock() -> SharedClock {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()))
}

fn tor_daemon() -> ScriptedTransport {
    ScriptedTransport::new()
        .on("AUTHENTICATE \"pw\"", "250 OK")
        .on("GETINFO circuit-status", CIRCUIT_REPLY)
        .on("GETINFO stream-status", STREAM_REPLY)
}

fn client(transport: ScriptedTransport) -> Arc<TorControlClient> {
    Arc::new(TorControlClient::new(transport, authenticator_for(Some("pw")), clock()))
}

fn monitor(transport: ScriptedTransport, probe: ScriptedProbe, store: SharedStore) -> Arc<ConnectionMonitor> {
    Arc::new(ConnectionMonitor::new(
        Some(client(transport)),
        Arc::new(probe),
        store,
        clock(),
        &MonitorConfig::default(),
    ))
}

#[tokio::test]
async fn test_sample_replies_resolve_hops() {
    let client = client(tor_daemon());

    let details = client.circuit_details().await.unwrap().unwrap();
    assert_eq!(details.circuit_id, "123");
    assert_eq!(details.entry_node.unwrap().nickname, "Guard");
    assert_eq!(details.middle_node.unwrap().nickname, "Mid");
    assert_eq!(details.exit_node.unwrap().nickname, "Exit");
    assert_eq!(details.build_time, Duration::from_secs(30));
    assert_eq!(client.state(), AuthState::Authenticated);
}

#[tokio::test]
async fn test_snapshot_published_to_store() {
    let store = MemoryStatusStore::shared();
    let monitor = monitor(tor_daemon(), ScriptedProbe::tor_confirmed(), store.clone());

    monitor.check_connection().await;

    let stored: ConnectionStatus = get_json(store.as_ref(), STATUS_KEY).unwrap();
    assert!(stored.connected);
    assert!(stored.circuit_established);
    assert_eq!(stored.entry_node.as_deref(), Some("Guard (AAAA1111...)"));
    assert_eq!(stored.middle_node.as_deref(), Some("Mid (BBBB2222...)"));
    assert_eq!(stored.exit_node.as_deref(), Some("Exit (CCCC3333...)"));
    assert_eq!(stored.label(), "Tor: Active");
}

#[tokio::test]
async fn test_probe_failure_keeps_hop_fields() {
    let store = MemoryStatusStore::shared();
    let probe = ScriptedProbe::new(Err(ProbeError::Timeout(Duration::from_secs(10))));
    let monitor = monitor(tor_daemon(), probe, store.clone());

    monitor.check_connection().await;

    let stored: ConnectionStatus = get_json(store.as_ref(), STATUS_KEY).unwrap();
    assert!(!stored.connected);
    assert!(!stored.circuit_established);
    assert!(stored.error.is_some());
    assert_eq!(stored.exit_node.as_deref(), Some("Exit (CCCC3333...)"));
}

#[tokio::test]
async fn test_recovers_after_daemon_comes_back() {
    let probe = ScriptedProbe::failing("connection refused").then(Ok(onionlens_tor::ProbeReport {
        reachable: true,
        confirmed_tor: true,
        observed_address: None,
    }));
    let monitor = monitor(tor_daemon(), probe, MemoryStatusStore::shared());

    let first = monitor.check_connection().await;
    assert_eq!(first.label(), "Tor: Disconnected");

    let second = monitor.check_connection().await;
    assert!(second.error.is_none());
    assert_eq!(second.label(), "Tor: Active");
}

#[tokio::test(start_paused = true)]
async fn test_double_start_single_timer() {
    let probe = ScriptedProbe::tor_confirmed();
    let monitor = monitor(tor_daemon(), probe.clone(), MemoryStatusStore::shared());

    monitor.start_monitoring(Duration::from_secs(30));
    monitor.start_monitoring(Duration::from_secs(30));
    tokio::time::sleep(Duration::from_secs(65)).await;

    assert_eq!(probe.calls(), 3);
    monitor.stop_monitoring();
}

#[tokio::test(start_paused = true)]
async fn test_mode_switch_drives_monitor_and_routing() {
    let store = MemoryStatusStore::shared();
    let probe = ScriptedProbe::tor_confirmed();
    let monitor = monitor(tor_daemon(), probe.clone(), store.clone());
    let service = PrivacyService::new(APP, PrivacyProxyConfig::default(), store.clone());
    service.init();

    let follower = monitor.follow_mode(service.subscribe(), Duration::from_secs(30));
    let request = RequestOrigin {
        url: "https://mainnet.infura.io/v3/key".to_string(),
        origin_url: Some(format!("{}background.html", APP)),
        tab_id: Some(BACKGROUND_TAB_ID),
    };

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!monitor.is_monitoring());
    assert_eq!(service.route(&request), ProxyTransport::Direct);

    service.set_mode(PrivacyMode::Tor).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(monitor.is_monitoring());
    assert_eq!(probe.calls(), 1);
    assert_eq!(service.route(&request).to_string(), "socks5h://127.0.0.1:9050");

    service.set_mode(PrivacyMode::Direct).unwrap();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(!monitor.is_monitoring());
    assert_eq!(probe.calls(), 1);

    service.set_mode(PrivacyMode::Nym).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!monitor.is_monitoring());

    // A restarted service picks the stored mode back up, not the configured default
    let restarted = PrivacyService::new(APP, PrivacyProxyConfig::default(), store);
    assert_eq!(restarted.mode(), PrivacyMode::Direct);
    assert_eq!(restarted.init(), PrivacyMode::Nym);
    assert_eq!(restarted.route(&request).to_string(), "socks5h://127.0.0.1:1080");

    drop(service);
    follower.await.unwrap();
}
