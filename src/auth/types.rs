// Session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::deserialize_expiry;
use crate::models::ledger::User;

/// A live authentication credential
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: String,

    /// None means the token never expires locally and no refresh is scheduled
    pub expires_at: Option<DateTime<Utc>>,

    /// The principal the token belongs to
    pub user: User,
}

/// How this session acquires and renews credentials.
///
/// Resolved once at initialization. Two transitions are sanctioned
/// afterwards: delegated sessions fall back to password login when the
/// parent handoff fails, and password sessions become pre-issued-token
/// sessions when the application supplies its own token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    /// Standalone password login
    PasswordLogin,

    /// Standalone session authenticated with an externally issued token
    PreIssuedToken,

    /// Embedded session; the parent container supplies credentials
    ParentDelegated,
}

impl OperatingMode {
    /// Ledger endpoints are mounted under a mode-specific prefix
    pub fn route_prefix(&self) -> &'static str {
        match self {
            OperatingMode::PasswordLogin | OperatingMode::PreIssuedToken => "/standalone",
            OperatingMode::ParentDelegated => "/iframe",
        }
    }

    /// Password-login sessions have no refresh endpoint to call
    pub fn supports_remote_refresh(&self) -> bool {
        !matches!(self, OperatingMode::PasswordLogin)
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperatingMode::PasswordLogin => "password-login",
            OperatingMode::PreIssuedToken => "pre-issued-token",
            OperatingMode::ParentDelegated => "parent-delegated",
        };
        f.write_str(s)
    }
}

/// Observable session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Unauthenticated,
    Authenticated,
    /// A credential is present but its expiry has passed
    Expired,
    /// A refresh is in flight
    Refreshing,
    LoggedOut,
}

/// Password login request body
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Password login response; unlike the ledger endpoints, the fields
/// arrive at the top level rather than inside a data envelope
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, deserialize_with = "deserialize_expiry")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Token validation payload (inside the envelope)
#[derive(Debug, Deserialize)]
pub struct ValidatePayload {
    pub user: User,
}

/// Token refresh payload (inside the envelope)
#[derive(Debug, Deserialize)]
pub struct RefreshPayload {
    pub token: String,
    #[serde(default, deserialize_with = "deserialize_expiry")]
    pub expires_at: Option<DateTime<Utc>>,
}
