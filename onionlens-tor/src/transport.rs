//! Control-port transport
//!
//! The control client only needs "send one command, get the whole reply".
//! [`TcpControlTransport`] speaks to the daemon directly; anything else that
//! can carry a command string (a native bridge, an IPC channel) can implement
//! [`ControlTransport`] instead.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use crate::TorConfig;

/// Transport failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Control port unavailable: {0}")]
    Unavailable(String),

    #[error("No reply from control port within {0:?}")]
    Timeout(Duration),
}

/// Carries control commands to the daemon
#[async_trait]
pub trait ControlTransport: Send {
    /// Send one command and return the complete reply, lines joined by `\n`
    async fn send(&mut self, command: &str) -> Result<String, TransportError>;

    /// Release the underlying connection, if any
    async fn close(&mut self) {}
}

struct ControlConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Control-port transport over a plain TCP connection
///
/// Connects lazily and drops the connection on any error or timeout, so the
/// next command starts from a fresh (unauthenticated) session.
pub struct TcpControlTransport {
    addr: String,
    timeout: Duration,
    conn: Option<ControlConnection>,
}

impl TcpControlTransport {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
            conn: None,
        }
    }

    pub fn from_config(config: &TorConfig) -> Self {
        Self::new(config.control_addr.clone(), config.control_timeout())
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    async fn exchange(&mut self, command: &str) -> Result<String, TransportError> {
        if self.conn.is_none() {
            debug!("Connecting to control port at {}", self.addr);
            let stream = TcpStream::connect(&self.addr)
                .await
                .map_err(|e| TransportError::Unavailable(format!("connect {}: {}", self.addr, e)))?;
            let (read_half, write_half) = stream.into_split();
            self.conn = Some(ControlConnection {
                reader: BufReader::new(read_half),
                writer: write_half,
            });
        }

        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| TransportError::Unavailable("not connected".to_string()))?;

        conn.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await
            .map_err(|e| TransportError::Unavailable(format!("failed to send command: {}", e)))?;
        conn.writer
            .flush()
            .await
            .map_err(|e| TransportError::Unavailable(format!("failed to flush: {}", e)))?;

        read_reply(&mut conn.reader).await
    }
}

#[async_trait]
impl ControlTransport for TcpControlTransport {
    async fn send(&mut self, command: &str) -> Result<String, TransportError> {
        trace!("-> {}", command.split_whitespace().next().unwrap_or(""));

        match tokio::time::timeout(self.timeout, self.exchange(command)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                warn!("Control port exchange failed: {}", e);
                self.conn = None;
                Err(e)
            }
            Err(_) => {
                warn!("Control port timed out after {:?}", self.timeout);
                self.conn = None;
                Err(TransportError::Timeout(self.timeout))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            let _ = conn.writer.shutdown().await;
        }
    }
}

/// Read one complete reply.
///
/// `NNN-` lines continue the reply, `NNN+` opens a data block that runs to a
/// lone `.`, and `NNN ` ends it. Asynchronous `650` events are dropped.
async fn read_reply<R>(reader: &mut R) -> Result<String, TransportError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = Vec::new();
    let mut in_block = false;

    loop {
        let mut raw = String::new();
        let read = reader
            .read_line(&mut raw)
            .await
            .map_err(|e| TransportError::Unavailable(format!("failed to read reply: {}", e)))?;

        if read == 0 {
            return Err(TransportError::Unavailable(
                "connection closed by daemon".to_string(),
            ));
        }

        let line = raw.trim_end_matches(['\r', '\n']).to_string();

        if in_block {
            if line == "." {
                in_block = false;
            }
            lines.push(line);
            continue;
        }

        if line.is_empty() {
            continue;
        }

        let bytes = line.as_bytes();
        let has_code = bytes.len() >= 3 && bytes[..3].iter().all(u8::is_ascii_digit);
        if !has_code {
            lines.push(line);
            continue;
        }

        if line.starts_with("650") {
            continue;
        }

        match bytes.get(3) {
            Some(b'+') => {
                in_block = true;
                lines.push(line);
            }
            Some(b'-') => lines.push(line),
            _ => {
                lines.push(line);
                break;
            }
        }
    }

    Ok(lines.join("\n"))
}
