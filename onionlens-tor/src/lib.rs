//! OnionLens Tor Layer
//!
//! Talks to a local Tor daemon and checks egress:
//! - Control-port transport (TCP by default, pluggable)
//! - Authenticated control client with circuit inspection and rotation
//! - SOCKS5h HTTP client builder
//! - Egress probe against check.torproject.org

pub mod proxy;
pub mod transport;
pub mod auth;
pub mod client;
pub mod probe;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use proxy::*;
pub use transport::*;
pub use auth::*;
pub use client::*;
pub use probe::*;
