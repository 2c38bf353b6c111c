//! OnionLens Core - Domain model for Tor circuit inspection
//!
//! This crate provides the foundational primitives:
//! - Circuit, hop and stream records parsed from control-port replies
//! - The reply parser for `circuit-status` / `stream-status`
//! - Stream-to-circuit correlation producing entry/middle/exit hops
//! - The published connection status snapshot
//! - Privacy modes, request sensitivity and transport routing

pub mod circuit;
pub mod stream;
pub mod status;
pub mod privacy;
pub mod clock;
pub mod reply;
pub mod correlate;
pub mod routing;

pub use circuit::*;
pub use stream::*;
pub use status::*;
pub use privacy::*;
pub use clock::*;
pub use reply::*;
pub use correlate::*;
pub use routing::*;

/// Purpose reported for circuits whose reply line carries no `PURPOSE=`
pub const DEFAULT_PURPOSE: &str = "GENERAL";

/// Nickname used for hops reported without a `~nickname` suffix
pub const UNKNOWN_NICKNAME: &str = "Unknown";

/// Minimum number of hops for a circuit to be reported as entry/middle/exit
pub const MIN_REPORTABLE_HOPS: usize = 3;

/// Number of fingerprint characters shown in hop summaries
pub const FINGERPRINT_PREFIX_LEN: usize = 8;
