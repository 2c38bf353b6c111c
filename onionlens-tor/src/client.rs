//! Tor control-port client
//!
//! Owns the authentication state of one control session and runs the
//! authenticate → query → parse → correlate pipeline. Every public call holds
//! the transport for its whole duration, so commands never interleave on the
//! wire and concurrent callers simply queue.

use parking_lot::RwLock;
use std::fmt;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use onionlens_core::{
    correlate, parse_circuits, parse_key_values, parse_streams, Circuit, CircuitDetails,
    SharedClock, StreamSelection,
};

use crate::{ControlTransport, SharedAuthenticator, TransportError};

/// Authentication state of the control session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Disconnected,
    Authenticating,
    Authenticated,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
        })
    }
}

/// Errors from control-port operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Circuit query failed: {0}")]
    CircuitQueryFailed(String),

    #[error("Circuit rotation failed: {0}")]
    CircuitRotationFailed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Client for one Tor control session
pub struct TorControlClient {
    transport: Mutex<Box<dyn ControlTransport>>,
    authenticator: SharedAuthenticator,
    clock: SharedClock,
    selection: StreamSelection,
    state: RwLock<AuthState>,
}

impl TorControlClient {
    pub fn new<T>(transport: T, authenticator: SharedAuthenticator, clock: SharedClock) -> Self
    where
        T: ControlTransport + 'static,
    {
        Self {
            transport: Mutex::new(Box::new(transport)),
            authenticator,
            clock,
            selection: StreamSelection::default(),
            state: RwLock::new(AuthState::Disconnected),
        }
    }

    /// Choose which succeeded stream decides the active circuit
    pub fn with_stream_selection(mut self, selection: StreamSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn state(&self) -> AuthState {
        *self.state.read()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == AuthState::Authenticated
    }

    fn set_state(&self, state: AuthState) {
        *self.state.write() = state;
    }

    /// Authenticate the session. Returns immediately if already authenticated.
    pub async fn authenticate(&self) -> Result<(), ControlError> {
        let mut transport = self.transport.lock().await;
        self.authenticate_locked(&mut **transport).await
    }

    async fn authenticate_locked(&self, transport: &mut dyn ControlTransport) -> Result<(), ControlError> {
        if self.is_authenticated() {
            return Ok(());
        }

        self.set_state(AuthState::Authenticating);

        match transport.send(&self.authenticator.command()).await {
            Ok(reply) if is_ok(&reply) => {
                self.set_state(AuthState::Authenticated);
                info!("Authenticated with Tor control port");
                Ok(())
            }
            Ok(reply) => {
                self.set_state(AuthState::Disconnected);
                let reason = first_line(&reply);
                warn!("Control port rejected authentication: {}", reason);
                Err(ControlError::AuthenticationFailed(reason))
            }
            Err(e) => {
                self.set_state(AuthState::Disconnected);
                warn!("Control port authentication failed: {}", e);
                Err(ControlError::AuthenticationFailed(e.to_string()))
            }
        }
    }

    /// Send a GETINFO-style query on an authenticated session.
    async fn query(&self, transport: &mut dyn ControlTransport, command: &str) -> Result<String, ControlError> {
        let reply = transport.send(command).await.map_err(|e| {
            // The transport may have lost the session along with the connection
            self.set_state(AuthState::Disconnected);
            ControlError::CircuitQueryFailed(format!("{}: {}", command, e))
        })?;

        if let Some(status) = error_status(&reply) {
            if status.starts_with("514") {
                self.set_state(AuthState::Disconnected);
            }
            return Err(ControlError::CircuitQueryFailed(format!("{}: {}", command, status)));
        }

        Ok(reply)
    }

    /// Resolve the circuit currently carrying traffic.
    ///
    /// `Ok(None)` means no stream has succeeded yet or its circuit is not a
    /// built three-hop circuit.
    pub async fn circuit_details(&self) -> Result<Option<CircuitDetails>, ControlError> {
        let mut guard = self.transport.lock().await;
        let transport = &mut **guard;

        self.authenticate_locked(transport).await?;

        // Read stream state right after circuit state to keep the skew small
        let circuit_reply = self.query(transport, "GETINFO circuit-status").await?;
        let stream_reply = self.query(transport, "GETINFO stream-status").await?;
        drop(guard);

        let now = self.clock.now();
        let circuits = parse_circuits(&circuit_reply, now);
        let streams = parse_streams(&stream_reply);
        debug!(
            circuits = circuits.len(),
            streams = streams.len(),
            "Parsed control-port state"
        );

        let details = correlate(&circuits, &streams, now, self.selection);
        match &details {
            Some(d) => debug!(circuit_id = %d.circuit_id, "Active circuit resolved"),
            None => debug!("No active circuit"),
        }
        Ok(details)
    }

    /// All circuits the daemon currently knows about
    pub async fn circuits(&self) -> Result<Vec<Circuit>, ControlError> {
        let mut guard = self.transport.lock().await;
        let transport = &mut **guard;

        self.authenticate_locked(transport).await?;
        let reply = self.query(transport, "GETINFO circuit-status").await?;
        Ok(parse_circuits(&reply, self.clock.now()))
    }

    /// Whether the daemon reports at least one usable circuit
    pub async fn circuit_established(&self) -> Result<bool, ControlError> {
        let mut guard = self.transport.lock().await;
        let transport = &mut **guard;

        self.authenticate_locked(transport).await?;
        let reply = self
            .query(transport, "GETINFO status/circuit-established")
            .await?;

        Ok(parse_key_values(&reply)
            .iter()
            .any(|(key, value)| key == "status/circuit-established" && value == "1"))
    }

    /// Ask the daemon to use fresh circuits for new streams (`SIGNAL NEWNYM`).
    ///
    /// Not retried here; the caller decides.
    pub async fn request_new_circuit(&self) -> Result<(), ControlError> {
        let mut guard = self.transport.lock().await;
        let transport = &mut **guard;

        self.authenticate_locked(transport).await?;

        match transport.send("SIGNAL NEWNYM").await {
            Ok(reply) if is_ok(&reply) => {
                info!("New circuit requested");
                Ok(())
            }
            Ok(reply) => Err(ControlError::CircuitRotationFailed(first_line(&reply))),
            Err(e) => {
                self.set_state(AuthState::Disconnected);
                Err(ControlError::CircuitRotationFailed(e.to_string()))
            }
        }
    }

    /// Close the session. Safe to call in any state.
    pub async fn disconnect(&self) -> Result<(), ControlError> {
        let mut transport = self.transport.lock().await;

        if !self.is_authenticated() {
            return Ok(());
        }

        let result = transport.send("QUIT").await;
        transport.close().await;
        self.set_state(AuthState::Disconnected);
        info!("Disconnected from Tor control port");

        result.map(|_| ()).map_err(ControlError::from)
    }
}

/// Whether the reply carries the `250 OK` success line
fn is_ok(reply: &str) -> bool {
    reply.lines().any(|line| line.trim_end() == "250 OK")
}

/// Final status line of a reply when it reports a 4xx/5xx error
fn error_status(reply: &str) -> Option<String> {
    let last = reply.lines().map(str::trim).rfind(|line| !line.is_empty())?;
    let bytes = last.as_bytes();
    let is_status = bytes.len() >= 3
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && bytes.get(3).map_or(true, |b| *b == b' ');

    (is_status && matches!(bytes[0], b'4' | b'5')).then(|| last.to_string())
}

fn first_line(reply: &str) -> String {
    reply.lines().next().unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use crate::{NullAuthenticator, PasswordAuthenticator};
    use chrono::{TimeZone, Utc};
    use onionlens_core::FixedClock;
    use std::sync::Arc;

    const CIRCUITS: &str = "250+circuit-status=\n\
        123 BUILT $AAAA1111~Guard,$BBBB2222~Mid,$CCCC3333~Exit BUILD_FLAGS=NEED_CAPACITY PURPOSE=GENERAL TIME_CREATED=2024-01-01T00:00:00\n\
        124 LAUNCHED $DDDD4444~Other\n\
        .\n\
        250 OK";

    const STREAMS: &str = "250+stream-status=\n1 SUCCEEDED 123 some-target\n.\n250 OK";

    fn clock() -> SharedClock {
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap()))
    }

    fn client(transport: ScriptedTransport) -> TorControlClient {
        TorControlClient::new(transport, Arc::new(NullAuthenticator), clock())
    }

    #[tokio::test]
    async fn test_authenticate_is_idempotent() {
        let transport = ScriptedTransport::new().on("AUTHENTICATE", "250 OK");
        let sent = transport.sent();
        let client = client(transport);

        assert_eq!(client.state(), AuthState::Disconnected);
        client.authenticate().await.unwrap();
        client.authenticate().await.unwrap();

        assert_eq!(client.state(), AuthState::Authenticated);
        assert_eq!(sent.commands(), vec!["AUTHENTICATE"]);
    }

    #[tokio::test]
    async fn test_failed_then_successful_authentication() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "515 Authentication failed: Wrong length on authentication cookie.")
            .on("AUTHENTICATE", "250 OK");
        let client = client(transport);

        let err = client.authenticate().await.unwrap_err();
        assert!(matches!(err, ControlError::AuthenticationFailed(ref m) if m.starts_with("515")));
        assert_eq!(client.state(), AuthState::Disconnected);

        client.authenticate().await.unwrap();
        assert_eq!(client.state(), AuthState::Authenticated);
    }

    #[tokio::test]
    async fn test_transport_failure_during_auth() {
        let transport = ScriptedTransport::new().on_error(
            "AUTHENTICATE",
            TransportError::Unavailable("connection refused".to_string()),
        );
        let client = client(transport);

        assert!(matches!(
            client.authenticate().await,
            Err(ControlError::AuthenticationFailed(_))
        ));
        assert_eq!(client.state(), AuthState::Disconnected);
    }

    #[tokio::test]
    async fn test_password_authenticator_command_is_sent() {
        let transport = ScriptedTransport::new().on("AUTHENTICATE \"secret\"", "250 OK");
        let client = TorControlClient::new(
            transport,
            Arc::new(PasswordAuthenticator::new("secret")),
            clock(),
        );
        client.authenticate().await.unwrap();
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn test_circuit_details_pipeline() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("GETINFO circuit-status", CIRCUITS)
            .on("GETINFO stream-status", STREAMS);
        let sent = transport.sent();
        let client = client(transport);

        let details = client.circuit_details().await.unwrap().unwrap();
        assert_eq!(details.entry_node.unwrap().nickname, "Guard");
        assert_eq!(details.middle_node.unwrap().nickname, "Mid");
        assert_eq!(details.exit_node.unwrap().nickname, "Exit");
        assert_eq!(details.circuit_id, "123");
        assert_eq!(details.build_time, std::time::Duration::from_secs(60));

        assert_eq!(
            sent.commands(),
            vec!["AUTHENTICATE", "GETINFO circuit-status", "GETINFO stream-status"]
        );
    }

    #[tokio::test]
    async fn test_no_streams_means_no_details() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("GETINFO circuit-status", CIRCUITS)
            .on("GETINFO stream-status", "250-stream-status=\n250 OK");
        let client = client(transport);

        assert_eq!(client.circuit_details().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_query_transport_failure() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("GETINFO circuit-status", CIRCUITS)
            .on_error("GETINFO stream-status", TransportError::Timeout(std::time::Duration::from_secs(5)));
        let client = client(transport);

        let err = client.circuit_details().await.unwrap_err();
        assert!(matches!(err, ControlError::CircuitQueryFailed(_)));
        assert_eq!(client.state(), AuthState::Disconnected);
    }

    #[tokio::test]
    async fn test_error_reply_is_query_failure() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("GETINFO circuit-status", "514 Authentication required.");
        let client = client(transport);

        let err = client.circuit_details().await.unwrap_err();
        assert_eq!(
            err,
            ControlError::CircuitQueryFailed(
                "GETINFO circuit-status: 514 Authentication required.".to_string()
            )
        );
        assert_eq!(client.state(), AuthState::Disconnected);
    }

    #[tokio::test]
    async fn test_circuits_and_established() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("GETINFO circuit-status", CIRCUITS)
            .on("GETINFO status/circuit-established", "250-status/circuit-established=1\n250 OK");
        let client = client(transport);

        let circuits = client.circuits().await.unwrap();
        assert_eq!(circuits.len(), 2);
        assert!(client.circuit_established().await.unwrap());
    }

    #[tokio::test]
    async fn test_request_new_circuit() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("SIGNAL NEWNYM", "250 OK")
            .on("SIGNAL NEWNYM", "552 Unrecognized signal");
        let client = client(transport);

        client.request_new_circuit().await.unwrap();
        let err = client.request_new_circuit().await.unwrap_err();
        assert_eq!(
            err,
            ControlError::CircuitRotationFailed("552 Unrecognized signal".to_string())
        );
    }

    #[tokio::test]
    async fn test_disconnect() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("QUIT", "250 closing connection");
        let sent = transport.sent();
        let client = client(transport);

        // No-op before authentication
        client.disconnect().await.unwrap();
        assert!(sent.commands().is_empty());

        client.authenticate().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), AuthState::Disconnected);
        assert_eq!(sent.commands(), vec!["AUTHENTICATE", "QUIT"]);

        client.disconnect().await.unwrap();
        assert_eq!(sent.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_do_not_interleave() {
        let transport = ScriptedTransport::new()
            .on("AUTHENTICATE", "250 OK")
            .on("GETINFO circuit-status", CIRCUITS)
            .on("GETINFO stream-status", STREAMS);
        let sent = transport.sent();
        let client = Arc::new(client(transport));

        let a = tokio::spawn({
            let client = client.clone();
            async move { client.circuit_details().await }
        });
        let b = tokio::spawn({
            let client = client.clone();
            async move { client.circuit_details().await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let commands = sent.commands();
        assert_eq!(commands.len(), 5);
        assert_eq!(commands[0], "AUTHENTICATE");
        for pair in commands[1..].chunks(2) {
            assert_eq!(pair, ["GETINFO circuit-status", "GETINFO stream-status"]);
        }
    }

    #[test]
    fn test_error_status() {
        assert_eq!(error_status("250 OK"), None);
        assert_eq!(error_status("552 Unrecognized key"), Some("552 Unrecognized key".to_string()));
        assert_eq!(error_status("250+x=\n123 BUILT\n.\n250 OK"), None);
    }
}
