// Credential acquisition
// The four ways a session obtains a credential: password login, a caller-supplied
// token (validated locally and/or remotely), a delegated handoff from the parent
// container, and the remote refresh exchange used for scheduled renewal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::auth::jwt;
use crate::auth::types::{AuthRequest, AuthResponse, Credential, OperatingMode, RefreshPayload, ValidatePayload};
use crate::config::Config;
use crate::error::{CreditError, Result};
use crate::host::HostContext;
use crate::models::ledger::ApiEnvelope;
use crate::models::messages::{ChildMessage, ParentMessage};
use crate::validate;

/// Acquires credentials from the ledger backend or the parent container.
///
/// The acquirer is stateless apart from the delegation gate: it never stores
/// what it acquires. Installing the credential into the session is the
/// [`SessionManager`](crate::auth::SessionManager)'s job.
#[derive(Clone)]
pub struct CredentialAcquirer {
    client: Client,
    api_url: String,
    host: Arc<dyn HostContext>,
    parent_origin: Option<String>,
    delegation_timeout: Duration,
    // Held across a delegated wait so a second wait is refused instead of
    // racing the first for the same parent response.
    delegation_gate: Arc<Mutex<()>>,
}

impl CredentialAcquirer {
    pub fn new(config: &Config, host: Arc<dyn HostContext>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(CreditError::Network)?;

        Ok(Self {
            client,
            api_url: config.clone().normalized().api_url,
            host,
            parent_origin: config.parent_origin.clone(),
            delegation_timeout: config.delegation_timeout,
            delegation_gate: Arc::new(Mutex::new(())),
        })
    }

    /// Exchanges an email/password pair for a credential.
    ///
    /// Inputs are validated locally first so malformed logins never reach the
    /// network. A 401 maps to a fixed message rather than echoing the server.
    pub async fn by_password(&self, email: &str, password: &str) -> Result<Credential> {
        validate::validate_login(email, password)?;

        let url = format!("{}/standalone/auth", self.api_url);
        debug!("submitting password login");

        let response = self
            .client
            .post(&url)
            .json(&AuthRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(CreditError::AuthenticationFailed(
                "Invalid email or password".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CreditError::from_response_body(status.as_u16(), &body));
        }

        let body: AuthResponse = response.json().await?;
        if !body.success {
            let message = body
                .message
                .or(body.error)
                .unwrap_or_else(|| "Authentication failed".to_string());
            return Err(CreditError::AuthenticationFailed(message));
        }
        let (Some(token), Some(user)) = (body.token, body.user) else {
            return Err(CreditError::AuthenticationFailed(
                "Authentication response was missing a token".to_string(),
            ));
        };

        info!(user_id = %user.id, "password authentication accepted");
        Ok(Credential {
            token,
            expires_at: body.expires_at,
            user,
        })
    }

    /// Builds a credential from a caller-supplied token.
    ///
    /// The token's embedded expiry is decoded locally and an already-expired
    /// token fails immediately, without a network round trip. When
    /// `trust_embedded_claims` is set and the token carries its own principal,
    /// the credential is built locally; otherwise the token is validated
    /// against the backend and the server's principal wins.
    pub async fn by_token(
        &self,
        token: &str,
        trust_embedded_claims: bool,
        mode: OperatingMode,
    ) -> Result<Credential> {
        let claims = jwt::decode_claims(token)?;
        let expires_at = claims.expires_at()?;
        if let Some(expiry) = expires_at {
            if expiry <= Utc::now() {
                return Err(CreditError::TokenExpired);
            }
        }

        if trust_embedded_claims {
            if let Some(user) = claims.user {
                debug!(user_id = %user.id, "trusting embedded token claims");
                return Ok(Credential {
                    token: token.to_string(),
                    expires_at,
                    user,
                });
            }
            // No embedded principal to trust; fall through to the backend.
        }

        let url = format!("{}{}/validate", self.api_url, mode.route_prefix());
        debug!(mode = %mode, "validating token against ledger");

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(CreditError::AuthenticationFailed("Invalid token".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CreditError::from_response_body(status.as_u16(), &body));
        }

        let envelope: ApiEnvelope<ValidatePayload> = response.json().await?;
        let payload = match envelope.data {
            Some(payload) if envelope.success => payload,
            _ => {
                return Err(CreditError::AuthenticationFailed(
                    envelope.error_message().to_string(),
                ))
            }
        };

        info!(user_id = %payload.user.id, "token validated");
        Ok(Credential {
            token: token.to_string(),
            expires_at,
            user: payload.user,
        })
    }

    /// Requests a credential from the parent container and waits for its reply.
    ///
    /// Posts a credential request to the parent, then consumes inbound messages
    /// until a token arrives, the parent reports an authentication error, or the
    /// delegation timeout elapses. Messages from unexpected origins and of
    /// unknown types are ignored without ending the wait. Only one wait may be
    /// outstanding at a time.
    pub async fn by_delegation(&self) -> Result<Credential> {
        let _wait = self.delegation_gate.try_lock().map_err(|_| {
            CreditError::Internal(anyhow::anyhow!(
                "a delegated credential wait is already in progress"
            ))
        })?;

        // Subscribe before posting so the reply cannot slip past us.
        let mut messages = self.host.subscribe();
        let target = self.parent_origin.as_deref().unwrap_or("*");
        self.host
            .post_to_parent(ChildMessage::request_credentials(), target);
        info!(target_origin = target, "requested credentials from parent container");

        let deadline = Instant::now() + self.delegation_timeout;
        loop {
            let envelope = match timeout_at(deadline, messages.recv()).await {
                Err(_) => {
                    return Err(CreditError::AuthenticationFailed(
                        "Timeout waiting for parent credentials".to_string(),
                    ))
                }
                Ok(None) => {
                    return Err(CreditError::AuthenticationFailed(
                        "Parent message channel closed".to_string(),
                    ))
                }
                Ok(Some(envelope)) => envelope,
            };

            if let Some(expected) = self.parent_origin.as_deref() {
                if envelope.origin != expected {
                    warn!(origin = %envelope.origin, "ignored parent message from unexpected origin");
                    continue;
                }
            }

            let message: ParentMessage = match serde_json::from_value(envelope.payload) {
                Ok(message) => message,
                Err(err) => {
                    debug!(error = %err, "ignored unparseable parent message");
                    continue;
                }
            };

            match message {
                ParentMessage::JwtToken {
                    token,
                    expires_at,
                    user,
                } => {
                    let Some(user) = user else {
                        return Err(CreditError::AuthenticationFailed(
                            "Invalid token data from parent".to_string(),
                        ));
                    };
                    if token.is_empty() {
                        return Err(CreditError::AuthenticationFailed(
                            "Invalid token data from parent".to_string(),
                        ));
                    }
                    if let Some(expiry) = expires_at {
                        if expiry <= Utc::now() {
                            return Err(CreditError::TokenExpired);
                        }
                    }
                    info!(user_id = %user.id, "delegated credentials received");
                    return Ok(Credential {
                        token,
                        expires_at,
                        user,
                    });
                }
                ParentMessage::AuthenticationError { error } => {
                    return Err(CreditError::AuthenticationFailed(error));
                }
                other => {
                    debug!(?other, "ignored parent message while waiting for credentials");
                }
            }
        }
    }

    /// Exchanges the current token for a renewed one.
    ///
    /// The refresh endpoint lives under the mode's route prefix. A 401 means the
    /// old token is no longer exchangeable and the session is over.
    pub async fn refresh_remote(&self, token: &str, mode: OperatingMode) -> Result<RefreshPayload> {
        let url = format!("{}{}/refresh-token", self.api_url, mode.route_prefix());
        debug!(mode = %mode, "refreshing token");

        let response = self.client.post(&url).bearer_auth(token).send().await?;
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(CreditError::TokenExpired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CreditError::from_response_body(status.as_u16(), &body));
        }

        let envelope: ApiEnvelope<RefreshPayload> = response.json().await?;
        let payload = match envelope.data {
            Some(payload) if envelope.success => payload,
            _ => {
                return Err(CreditError::AuthenticationFailed(
                    "Token refresh failed".to_string(),
                ))
            }
        };
        if payload.token.is_empty() {
            return Err(CreditError::AuthenticationFailed(
                "Refresh response did not contain a token".to_string(),
            ));
        }

        info!("token refresh accepted");
        Ok(payload)
    }
}
