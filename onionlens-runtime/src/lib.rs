//! OnionLens Runtime
//!
//! Long-running pieces built on the core and Tor layers:
//! - Connection monitor publishing merged status snapshots
//! - Privacy mode service with persisted mode and request routing
//! - Status store shared with readers
//! - Application configuration

pub mod store;
pub mod monitor;
pub mod privacy;
pub mod config;

pub use store::*;
pub use monitor::*;
pub use privacy::*;
pub use config::*;
