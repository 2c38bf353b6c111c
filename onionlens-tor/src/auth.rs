//! Control-port authenticators
//!
//! The control client asks an [`Authenticator`] for the `AUTHENTICATE`
//! command line; how the credential is obtained is up to the implementation.

use std::fmt;
use std::sync::Arc;

/// Produces the `AUTHENTICATE` command for a control session
pub trait Authenticator: Send + Sync {
    fn command(&self) -> String;
}

pub type SharedAuthenticator = Arc<dyn Authenticator>;

/// No credential (`CookieAuthentication 0`, no `HashedControlPassword`)
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuthenticator;

impl Authenticator for NullAuthenticator {
    fn command(&self) -> String {
        "AUTHENTICATE".to_string()
    }
}

/// Plain control password, sent as a quoted string
#[derive(Clone)]
pub struct PasswordAuthenticator {
    password: String,
}

impl PasswordAuthenticator {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

impl fmt::Debug for PasswordAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordAuthenticator").finish_non_exhaustive()
    }
}

impl Authenticator for PasswordAuthenticator {
    fn command(&self) -> String {
        format!("AUTHENTICATE \"{}\"", escape_tor_string(&self.password))
    }
}

/// Pick an authenticator from an optional password
pub fn authenticator_for(password: Option<&str>) -> SharedAuthenticator {
    match password {
        Some(p) if !p.is_empty() => Arc::new(PasswordAuthenticator::new(p)),
        _ => Arc::new(NullAuthenticator),
    }
}

/// Escape a string for the control protocol.
fn escape_tor_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
