// JWT payload inspection
// Tokens are decoded locally to read the expiry and any embedded principal.
// Signatures are never checked here; verification is the ledger's job.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{CreditError, Result};
use crate::models::ledger::User;

/// The claims this SDK reads; everything else in the payload is ignored
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JwtClaims {
    /// Expiry, seconds since the epoch
    #[serde(default)]
    pub exp: Option<i64>,

    /// Principal embedded by the issuer, when present
    #[serde(default)]
    pub user: Option<User>,
}

impl JwtClaims {
    /// Expiry as a timestamp, when the token carries one
    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        match self.exp {
            None => Ok(None),
            Some(secs) => DateTime::from_timestamp(secs, 0).map(Some).ok_or_else(|| {
                CreditError::ValidationError("Malformed JWT: exp claim out of range".to_string())
            }),
        }
    }
}

/// Decodes the payload segment of a compact JWT without verifying it
pub fn decode_claims(token: &str) -> Result<JwtClaims> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(CreditError::ValidationError(
            "Malformed JWT: expected three dot-separated segments".to_string(),
        ));
    }

    let payload = URL_SAFE_NO_PAD.decode(segments[1]).map_err(|_| {
        CreditError::ValidationError("Malformed JWT: payload is not base64url".to_string())
    })?;

    serde_json::from_slice(&payload).map_err(|_| {
        CreditError::ValidationError("Malformed JWT: payload is not a JSON object".to_string())
    })
}

/// Builds an unsigned compact JWT around the given payload
#[cfg(any(test, feature = "test-utils"))]
pub fn encode_unsigned(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string().as_bytes());
    format!("{header}.{body}.unsigned")
}
