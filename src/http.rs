// HTTP transport for ledger API calls
// Attaches the session's bearer token, retries where the operation allows
// it, and performs the single refresh-and-retry pass on 401

use std::time::Duration;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::auth::SessionManager;
use crate::config::Config;
use crate::error::{CreditError, Result};
use crate::models::ledger::ApiEnvelope;

/// HTTP client for ledger API calls.
///
/// Every request goes out with the current session token. A 401 answer
/// triggers exactly one token refresh followed by one retry; a second 401
/// surfaces as an authentication failure rather than looping. Transport
/// failures, 429 and 5xx are retried with exponential backoff, but only on
/// the idempotent path.
#[derive(Clone)]
pub struct LedgerHttpClient {
    client: Client,
    session: SessionManager,
    max_retries: u32,
    base_delay_ms: u64,
}

impl LedgerHttpClient {
    pub fn new(session: SessionManager, config: &Config) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(CreditError::Network)?;

        Ok(Self {
            client,
            session,
            max_retries: config.http_max_retries,
            base_delay_ms: config.http_retry_base_delay.as_millis() as u64,
        })
    }

    /// Starts a request against the ledger.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Executes an idempotent read: transport failures, 429 and 5xx are
    /// retried with backoff up to the configured budget.
    pub async fn execute_idempotent(&self, request: Request) -> Result<Response> {
        self.execute_internal(request, self.max_retries).await
    }

    /// Executes a mutation: fails fast on transport errors, no backoff
    /// retries. The 401 refresh-and-retry pass still applies.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.execute_internal(request, 0).await
    }

    async fn execute_internal(&self, mut request: Request, max_retries: u32) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let mut attempt = 0;
        let mut refreshed_once = false;

        loop {
            self.attach_bearer(&mut request).await?;

            // Clone the request for this attempt
            let req = request.try_clone().ok_or_else(|| {
                CreditError::Internal(anyhow::anyhow!("Request body is not cloneable"))
            })?;

            debug!(
                method = %method,
                url = %url,
                attempt = attempt + 1,
                "sending ledger request"
            );

            match self.client.execute(req).await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    // 401: refresh once and replay with the renewed token
                    if status.as_u16() == 401
                        && self.session.auto_refresh_enabled()
                        && !refreshed_once
                    {
                        warn!(url = %url, "ledger rejected the token, refreshing and retrying");
                        self.session.refresh().await?;
                        refreshed_once = true;
                        continue;
                    }

                    // 429 or 5xx: exponential backoff within the budget
                    if matches!(status.as_u16(), 429 | 500..=599) && attempt < max_retries {
                        let delay = self.backoff_delay(attempt);
                        warn!(
                            status = %status,
                            delay_ms = delay,
                            attempt = attempt + 1,
                            max_retries,
                            "retrying ledger request"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    let body = response.text().await.unwrap_or_default();
                    error!(
                        status = status.as_u16(),
                        url = %url,
                        body = %body,
                        attempt = attempt + 1,
                        "ledger request failed"
                    );
                    return Err(CreditError::from_response_body(status.as_u16(), &body));
                }

                Err(err) => {
                    let error_kind = if err.is_timeout() {
                        "timeout"
                    } else if err.is_connect() {
                        "connection_failed"
                    } else if err.is_request() {
                        "request_error"
                    } else if err.is_body() {
                        "body_error"
                    } else if err.is_decode() {
                        "decode_error"
                    } else {
                        "unknown"
                    };

                    if attempt < max_retries {
                        let delay = self.backoff_delay(attempt);
                        warn!(
                            error_kind,
                            error = %err,
                            delay_ms = delay,
                            attempt = attempt + 1,
                            max_retries,
                            "ledger request errored, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        attempt += 1;
                        continue;
                    }

                    error!(
                        error_kind,
                        error = %err,
                        url = %url,
                        total_attempts = attempt + 1,
                        "ledger request failed after all retries"
                    );
                    return Err(CreditError::Network(err));
                }
            }
        }
    }

    /// Overwrites the Authorization header with the current session token,
    /// so a replay after refresh carries the renewed one.
    async fn attach_bearer(&self, request: &mut Request) -> Result<()> {
        match self.session.token().await {
            Some(token) => {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    CreditError::Internal(anyhow::anyhow!(
                        "session token contains characters not valid in a header"
                    ))
                })?;
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            None => {
                request.headers_mut().remove(AUTHORIZATION);
            }
        }
        Ok(())
    }

    /// Exponential backoff with jitter to avoid thundering herd
    fn backoff_delay(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_ms * 2_u64.pow(attempt);
        let jitter = (delay as f64 * 0.1 * rand::random()) as u64;
        delay + jitter
    }
}

/// Unwraps a successful response's `{ success, data }` envelope, converting
/// a `success: false` body into its classified error.
pub(crate) async fn decode_payload<T: DeserializeOwned>(response: Response) -> Result<T> {
    let envelope: ApiEnvelope<T> = response.json().await?;
    match envelope.data {
        Some(data) if envelope.success => Ok(data),
        _ => Err(CreditError::from_failed_envelope(envelope.error_message())),
    }
}

// Simple random number generation for jitter
mod rand {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};

    pub fn random() -> f64 {
        let state = RandomState::new();
        let mut hasher = state.build_hasher();
        std::time::SystemTime::now().hash(&mut hasher);
        (hasher.finish() % 1000) as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventHandlers;
    use crate::host::DetachedHost;
    use std::sync::Arc;

    fn test_client(max_retries: u32) -> LedgerHttpClient {
        let config = Config::new("http://127.0.0.1:9");
        let session = SessionManager::new(
            Arc::new(config.clone().normalized()),
            Arc::new(DetachedHost),
            EventHandlers::new(),
        )
        .unwrap();
        let mut config = config;
        config.http_max_retries = max_retries;
        LedgerHttpClient::new(session, &config).unwrap()
    }

    #[test]
    fn test_backoff_calculation() {
        let client = test_client(3);

        let delay0 = client.backoff_delay(0);
        let delay1 = client.backoff_delay(1);
        let delay2 = client.backoff_delay(2);

        // Each delay roughly doubles, with up to 10% jitter
        assert!((1000..=1100).contains(&delay0));
        assert!((2000..=2200).contains(&delay1));
        assert!((4000..=4400).contains(&delay2));
    }

    #[tokio::test]
    async fn test_transport_error_maps_to_network() {
        let client = test_client(0);
        let request = client
            .request(Method::GET, "http://127.0.0.1:9/standalone/balance")
            .build()
            .unwrap();

        let err = client.execute(request).await.unwrap_err();
        assert!(matches!(err, CreditError::Network(_)));
        assert_eq!(err.code(), "NETWORK_ERROR");
    }
}
