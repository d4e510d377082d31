// Error handling module
// Defines the error taxonomy shared by every public SDK operation

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Picks credit figures out of server messages like
/// "Insufficient credits. Required: 100, Available: 40"
static CREDIT_FIGURE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(required|available):\s*(\d+)").unwrap());

/// Errors surfaced by SDK operations
#[derive(Error, Debug)]
pub enum CreditError {
    /// Wrong credentials, or an operation that needs an authenticated session
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The stored token has expired, or the remote system rejected a refresh
    #[error("Token has expired")]
    TokenExpired,

    /// A spend larger than the current balance
    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    /// Non-positive credit amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Input rejected before any network call
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Remote failure that fits no other variant
    #[error("Ledger API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation called before initialize()
    #[error("Credit system is not initialized")]
    NotInitialized,

    /// Classification fallback
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// SDK-internal invariant failure
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CreditError {
    /// Stable machine-readable code for each variant
    pub fn code(&self) -> &'static str {
        match self {
            CreditError::AuthenticationFailed(_) => "AUTH_FAILED",
            CreditError::TokenExpired => "TOKEN_EXPIRED",
            CreditError::InsufficientCredits { .. } => "INSUFFICIENT_CREDITS",
            CreditError::InvalidAmount(_) => "INVALID_AMOUNT",
            CreditError::ValidationError(_) => "VALIDATION_ERROR",
            CreditError::Network(_) => "NETWORK_ERROR",
            CreditError::Api { .. } => "API_ERROR",
            CreditError::InvalidConfiguration(_) => "INVALID_CONFIG",
            CreditError::NotInitialized => "NOT_INITIALIZED",
            CreditError::Unknown(_) => "UNKNOWN_ERROR",
            CreditError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status associated with the failure, when one exists
    pub fn status(&self) -> Option<u16> {
        match self {
            CreditError::AuthenticationFailed(_) | CreditError::TokenExpired => Some(401),
            CreditError::InsufficientCredits { .. }
            | CreditError::InvalidAmount(_)
            | CreditError::ValidationError(_) => Some(400),
            CreditError::Api { status, .. } => Some(*status),
            CreditError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Classifies a non-success API response by status and message text.
    ///
    /// 401 always means the credentials were rejected. Beyond that the
    /// remote system signals the failure kind only through the message
    /// body, so classification falls back to substring matching, keeping
    /// the status in the catch-all so callers can still refine on it.
    pub fn from_api_response(status: u16, message: &str) -> Self {
        if status == 401 {
            return CreditError::AuthenticationFailed(message.to_string());
        }
        Self::classify_message(message).unwrap_or_else(|| CreditError::Api {
            status,
            message: message.to_string(),
        })
    }

    /// Classifies a failure reported without an HTTP status: a 2xx envelope
    /// with `success: false`, or an error message pushed by the parent.
    pub fn from_failed_envelope(message: &str) -> Self {
        Self::classify_message(message).unwrap_or_else(|| CreditError::Unknown(message.to_string()))
    }

    /// Classifies a raw non-success response body. The ledger normally wraps
    /// failures in a `{ message | error }` JSON object, but proxies in front
    /// of it answer in plain text.
    pub(crate) fn from_response_body(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value) => value
                .get("message")
                .and_then(|v| v.as_str())
                .or_else(|| value.get("error").and_then(|v| v.as_str()))
                .map(str::to_string)
                .unwrap_or_else(|| body.trim().to_string()),
            Err(_) => body.trim().to_string(),
        };
        if message.is_empty() {
            return Self::from_api_response(status, "Request failed");
        }
        Self::from_api_response(status, &message)
    }

    fn classify_message(message: &str) -> Option<Self> {
        let lowered = message.to_lowercase();
        if lowered.contains("insufficient") {
            let (required, available) = parse_credit_figures(message);
            return Some(CreditError::InsufficientCredits {
                required,
                available,
            });
        }
        if lowered.contains("invalid") {
            return Some(CreditError::ValidationError(message.to_string()));
        }
        None
    }
}

/// Extracts "Required: N" / "Available: N" figures from a server message,
/// defaulting to zero when a figure is absent
fn parse_credit_figures(message: &str) -> (i64, i64) {
    let mut required = 0;
    let mut available = 0;
    for caps in CREDIT_FIGURE.captures_iter(message) {
        let value = caps[2].parse().unwrap_or(0);
        if caps[1].eq_ignore_ascii_case("required") {
            required = value;
        } else {
            available = value;
        }
    }
    (required, available)
}

/// Result type alias for SDK operations
pub type Result<T> = std::result::Result<T, CreditError>;
