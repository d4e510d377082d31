// SDK configuration
// Construct directly, or via environment variables for host applications
// that keep their ledger settings in .env files

use std::time::Duration;

use url::Url;

use crate::error::{CreditError, Result};

/// Declared credential acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Password login against the standalone endpoints
    Standalone,
    /// Credentials delegated by a parent container over the message channel
    Jwt,
    /// Delegated when the host reports nesting, standalone otherwise
    #[default]
    Auto,
}

impl std::str::FromStr for AuthMode {
    type Err = CreditError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "standalone" => Ok(AuthMode::Standalone),
            "jwt" => Ok(AuthMode::Jwt),
            "auto" => Ok(AuthMode::Auto),
            other => Err(CreditError::InvalidConfiguration(format!(
                "authMode must be 'standalone', 'jwt' or 'auto', got '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthMode::Standalone => "standalone",
            AuthMode::Jwt => "jwt",
            AuthMode::Auto => "auto",
        };
        f.write_str(s)
    }
}

/// Ledger SDK configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the ledger API, without a trailing slash
    pub api_url: String,

    /// Credential acquisition mode
    pub auth_mode: AuthMode,

    /// Expected origin of the parent container. When set, delegation
    /// messages from other origins are ignored and outbound parent
    /// messages target this origin instead of "*"
    pub parent_origin: Option<String>,

    /// Schedule a refresh ahead of token expiry
    pub auto_refresh_token: bool,

    /// How long before expiry the scheduled refresh fires
    pub token_refresh_buffer: Duration,

    /// Ceiling on the wait for parent-delegated credentials
    pub delegation_timeout: Duration,

    /// Re-validate delegated tokens against the API instead of trusting
    /// the parent handoff
    pub validate_delegated_tokens: bool,

    /// Retry budget for idempotent reads (balance)
    pub http_max_retries: u32,

    /// First backoff delay for idempotent retries; doubles per attempt
    pub http_retry_base_delay: Duration,
}

impl Config {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            auth_mode: AuthMode::default(),
            parent_origin: None,
            auto_refresh_token: true,
            token_refresh_buffer: Duration::from_secs(60),
            delegation_timeout: Duration::from_secs(10),
            validate_delegated_tokens: false,
            http_max_retries: 3,
            http_retry_base_delay: Duration::from_secs(1),
        }
    }

    /// Load configuration from the environment (.env files honored)
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let api_url = std::env::var("CREDIT_LEDGER_API_URL").map_err(|_| {
            CreditError::InvalidConfiguration("CREDIT_LEDGER_API_URL is required".to_string())
        })?;

        let mut config = Self::new(api_url);

        if let Ok(mode) = std::env::var("CREDIT_LEDGER_AUTH_MODE") {
            config.auth_mode = mode.parse()?;
        }

        config.parent_origin = std::env::var("CREDIT_LEDGER_PARENT_ORIGIN").ok();

        config.auto_refresh_token = std::env::var("CREDIT_LEDGER_AUTO_REFRESH")
            .map(|s| parse_bool(&s, true))
            .unwrap_or(true);

        config.token_refresh_buffer = std::env::var("CREDIT_LEDGER_REFRESH_BUFFER_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(config.token_refresh_buffer);

        config.delegation_timeout = std::env::var("CREDIT_LEDGER_DELEGATION_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(config.delegation_timeout);

        config.validate_delegated_tokens = std::env::var("CREDIT_LEDGER_VALIDATE_DELEGATED")
            .map(|s| parse_bool(&s, false))
            .unwrap_or(false);

        config.http_max_retries = std::env::var("CREDIT_LEDGER_HTTP_MAX_RETRIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(config.http_max_retries);

        config.http_retry_base_delay = std::env::var("CREDIT_LEDGER_HTTP_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(config.http_retry_base_delay);

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_url.is_empty() {
            return Err(CreditError::InvalidConfiguration(
                "apiUrl is required".to_string(),
            ));
        }

        let url = Url::parse(&self.api_url).map_err(|e| {
            CreditError::InvalidConfiguration(format!("apiUrl is not a valid URL: {e}"))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(CreditError::InvalidConfiguration(format!(
                "apiUrl must use http or https, got '{}'",
                url.scheme()
            )));
        }

        Ok(())
    }

    /// Strips the trailing slash so path concatenation stays predictable
    pub(crate) fn normalized(mut self) -> Self {
        while self.api_url.ends_with('/') {
            self.api_url.pop();
        }
        self
    }
}

/// Parse a boolean-ish environment value
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}
