//! Scripted doubles for the control transport and the egress probe

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::{ConnectivityProbe, ControlTransport, ProbeError, ProbeReport, TransportError};

/// Commands seen by a [`ScriptedTransport`]
#[derive(Debug, Clone, Default)]
pub struct SentLog(Arc<Mutex<Vec<String>>>);

impl SentLog {
    pub fn commands(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    fn push(&self, command: &str) {
        self.0.lock().push(command.to_string());
    }
}

/// Transport answering from per-command reply queues.
///
/// Each command's queue is consumed in order; the last reply sticks and is
/// repeated for every further call. Unscripted commands fail as unavailable.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: HashMap<String, VecDeque<Result<String, TransportError>>>,
    sent: SentLog,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, command: &str, reply: &str) -> Self {
        self.push(command, Ok(reply.to_string()))
    }

    pub fn on_error(self, command: &str, error: TransportError) -> Self {
        self.push(command, Err(error))
    }

    fn push(mut self, command: &str, reply: Result<String, TransportError>) -> Self {
        self.replies
            .entry(command.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Handle on the log of sent commands
    pub fn sent(&self) -> SentLog {
        self.sent.clone()
    }
}

#[async_trait]
impl ControlTransport for ScriptedTransport {
    async fn send(&mut self, command: &str) -> Result<String, TransportError> {
        self.sent.push(command);

        let queue = self
            .replies
            .get_mut(command)
            .ok_or_else(|| TransportError::Unavailable(format!("unscripted command: {}", command)))?;

        let reply = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };

        reply.unwrap_or_else(|| Err(TransportError::Unavailable("no reply".to_string())))
    }
}

/// Probe answering from a queue of results, last one sticky
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    results: Arc<Mutex<VecDeque<Result<ProbeReport, ProbeError>>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedProbe {
    pub fn new(result: Result<ProbeReport, ProbeError>) -> Self {
        Self {
            results: Arc::new(Mutex::new(VecDeque::from([result]))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Probe that always confirms Tor egress
    pub fn tor_confirmed() -> Self {
        Self::new(Ok(ProbeReport {
            reachable: true,
            confirmed_tor: true,
            observed_address: Some("185.220.101.1".to_string()),
        }))
    }

    /// Probe that always fails with the given message
    pub fn failing(message: &str) -> Self {
        Self::new(Err(ProbeError::Failed(message.to_string())))
    }

    pub fn then(self, result: Result<ProbeReport, ProbeError>) -> Self {
        self.results.lock().push_back(result);
        self
    }

    /// Number of checks run so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectivityProbe for ScriptedProbe {
    async fn check(&self) -> Result<ProbeReport, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut results = self.results.lock();
        let result = if results.len() > 1 {
            results.pop_front()
        } else {
            results.front().cloned()
        };

        result.unwrap_or_else(|| Err(ProbeError::Failed("no scripted result".to_string())))
    }
}
