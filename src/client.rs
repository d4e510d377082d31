// Ledger operations
// Typed wrappers over the credit endpoints. Every call resolves the
// mode-specific route prefix from the session, goes through the
// credential-injecting executor and unwraps the response envelope.
// Successful mutations are mirrored to the parent container when one
// is configured.

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use tracing::{debug, info};

use crate::auth::SessionManager;
use crate::config::Config;
use crate::error::{CreditError, Result};
use crate::host::HostContext;
use crate::http::{self, LedgerHttpClient};
use crate::models::ledger::{
    AddCreditsRequest, Balance, RefundRequest, SpendRequest, Transaction, TransactionHistory,
    TransactionHistoryParams, TransactionId, TransactionOutcome,
};
use crate::models::messages::ChildMessage;
use crate::validate;

/// Client for the ledger endpoints.
///
/// Reads go through the retrying executor, mutations fail fast (see
/// [`LedgerHttpClient`]). Requests are only attempted once the session
/// has resolved an operating mode, since the mode picks the route prefix.
#[derive(Clone)]
pub struct ApiClient {
    http: LedgerHttpClient,
    session: SessionManager,
    host: Arc<dyn HostContext>,
    api_url: String,
    parent_origin: Option<String>,
}

impl ApiClient {
    pub fn new(
        http: LedgerHttpClient,
        session: SessionManager,
        host: Arc<dyn HostContext>,
        config: &Config,
    ) -> Self {
        Self {
            http,
            session,
            host,
            api_url: config.clone().normalized().api_url,
            parent_origin: config.parent_origin.clone(),
        }
    }

    /// Fetches the current balance and mirrors it to the parent container.
    pub async fn get_balance(&self) -> Result<Balance> {
        let url = self.endpoint("/balance").await?;
        debug!("fetching balance");

        let request = self.http.request(Method::GET, &url).build()?;
        let response = self.http.execute_idempotent(request).await?;
        let balance: Balance = http::decode_payload(response).await?;

        self.notify_parent(ChildMessage::BalanceUpdate {
            balance: balance.balance,
        });
        info!(balance = balance.balance, "balance fetched");
        Ok(balance)
    }

    /// Spends credits. An insufficient-balance rejection carries the
    /// requested amount plus whatever the server reported as available.
    pub async fn spend(&self, request: &SpendRequest) -> Result<TransactionOutcome> {
        validate::validate_spend_request(request)?;
        let url = self.endpoint("/spend").await?;
        debug!(amount = request.amount, "processing spend");

        let outcome = match self.post_for_outcome(&url, request).await {
            Ok(outcome) => outcome,
            Err(CreditError::InsufficientCredits { available, .. }) => {
                return Err(CreditError::InsufficientCredits {
                    required: request.amount,
                    available,
                });
            }
            Err(CreditError::Api {
                status: 400,
                message,
            }) => return Err(CreditError::ValidationError(message)),
            Err(err) => return Err(err),
        };

        info!(
            transaction = %outcome.transaction.id,
            amount = outcome.transaction.amount,
            "spend recorded"
        );
        self.notify_mutation("spend", &outcome);
        Ok(outcome)
    }

    /// Adds credits to the balance.
    pub async fn add_credits(&self, request: &AddCreditsRequest) -> Result<TransactionOutcome> {
        validate::validate_amount(request.amount)?;
        let url = self.endpoint("/add-credits").await?;
        debug!(amount = request.amount, "adding credits");

        let outcome = self.post_for_outcome(&url, request).await?;
        info!(
            transaction = %outcome.transaction.id,
            amount = outcome.transaction.amount,
            "credits added"
        );
        self.notify_mutation("add_credits", &outcome);
        Ok(outcome)
    }

    /// Pages through past transactions, newest first.
    pub async fn get_transaction_history(
        &self,
        params: &TransactionHistoryParams,
    ) -> Result<TransactionHistory> {
        validate::validate_history_params(params)?;
        let url = self.endpoint("/history").await?;
        debug!(?params, "fetching transaction history");

        let request = self
            .http
            .request(Method::GET, &url)
            .query(params)
            .build()?;
        let response = self.http.execute_idempotent(request).await?;
        let history: TransactionHistory = http::decode_payload(response).await?;

        info!(
            count = history.transactions.len(),
            total = history.total,
            "transaction history fetched"
        );
        Ok(history)
    }

    /// Looks up a single transaction by id.
    pub async fn get_transaction(&self, id: &TransactionId) -> Result<Transaction> {
        let url = self.endpoint(&format!("/transaction/{id}")).await?;
        debug!(%id, "fetching transaction");

        let request = self.http.request(Method::GET, &url).build()?;
        let outcome: TransactionOutcome = match self.http.execute_idempotent(request).await {
            Ok(response) => http::decode_payload(response).await?,
            Err(err) => return Err(refine_not_found(err, id)),
        };
        Ok(outcome.transaction)
    }

    /// Reverses a completed transaction.
    pub async fn refund_transaction(
        &self,
        id: &TransactionId,
        reason: Option<String>,
    ) -> Result<TransactionOutcome> {
        let url = self.endpoint(&format!("/refund/{id}")).await?;
        debug!(%id, "processing refund");

        let body = RefundRequest { reason };
        let outcome = match self.post_for_outcome(&url, &body).await {
            Ok(outcome) => outcome,
            Err(CreditError::Api {
                status: 400,
                message,
            }) => return Err(CreditError::ValidationError(message)),
            Err(err) => return Err(refine_not_found(err, id)),
        };

        info!(transaction = %outcome.transaction.id, "refund recorded");
        self.notify_mutation("refund", &outcome);
        Ok(outcome)
    }

    async fn post_for_outcome<B>(&self, url: &str, body: &B) -> Result<TransactionOutcome>
    where
        B: Serialize + ?Sized,
    {
        let request = self.http.request(Method::POST, url).json(body).build()?;
        let response = self.http.execute(request).await?;
        http::decode_payload(response).await
    }

    async fn endpoint(&self, path: &str) -> Result<String> {
        let prefix = self.session.route_prefix().await?;
        Ok(format!("{}{prefix}{path}", self.api_url))
    }

    /// Mirrors a message up to the parent container. Requires an explicit
    /// configured origin; nothing is ever broadcast to `*` from here.
    fn notify_parent(&self, message: ChildMessage) {
        if !self.host.is_nested() {
            return;
        }
        let Some(origin) = self.parent_origin.as_deref() else {
            debug!("no parent origin configured, skipping parent notification");
            return;
        };
        self.host.post_to_parent(message, origin);
    }

    fn notify_mutation(&self, operation: &'static str, outcome: &TransactionOutcome) {
        self.notify_parent(ChildMessage::OperationComplete {
            operation,
            transaction: outcome.transaction.clone(),
        });
        if let Some(balance) = outcome.new_balance {
            self.notify_parent(ChildMessage::BalanceUpdate { balance });
        }
    }
}

fn refine_not_found(err: CreditError, id: &TransactionId) -> CreditError {
    match err {
        CreditError::Api { status: 404, .. } => {
            CreditError::ValidationError(format!("Transaction {id} not found"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Credential, OperatingMode};
    use crate::config::Config;
    use crate::events::EventHandlers;
    use crate::host::{ChannelHost, DetachedHost};
    use crate::models::ledger::{TransactionKind, User, UserId};
    use chrono::Utc;
    use tokio::sync::broadcast::error::TryRecvError;

    // Unreachable on purpose: these tests must never touch the network.
    const DEAD_URL: &str = "http://127.0.0.1:9";

    fn client_with(config: Config, host: Arc<dyn HostContext>) -> ApiClient {
        let config = config.normalized();
        let session = SessionManager::new(
            Arc::new(config.clone()),
            host.clone(),
            EventHandlers::new(),
        )
        .unwrap();
        let http = LedgerHttpClient::new(session.clone(), &config).unwrap();
        ApiClient::new(http, session, host, &config)
    }

    async fn seeded_client(mode: OperatingMode) -> ApiClient {
        let client = client_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        client
            .session
            .seed_for_testing(
                Credential {
                    token: "tok".to_string(),
                    expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
                    user: User {
                        id: UserId::Int(1),
                        name: None,
                        email: None,
                    },
                },
                mode,
            )
            .await
            .unwrap();
        client
    }

    fn test_outcome(new_balance: Option<i64>) -> TransactionOutcome {
        TransactionOutcome {
            transaction: Transaction {
                id: TransactionId::Str("tx-9".to_string()),
                kind: TransactionKind::Spend,
                amount: 25,
                description: Some("test".to_string()),
                created_at: Utc::now(),
                status: None,
                metadata: None,
            },
            new_balance,
        }
    }

    // ==================================================================================================
    // Routing
    // ==================================================================================================

    #[tokio::test]
    async fn test_endpoint_follows_the_session_mode() {
        let client = seeded_client(OperatingMode::PasswordLogin).await;
        assert_eq!(
            client.endpoint("/balance").await.unwrap(),
            format!("{DEAD_URL}/standalone/balance")
        );

        let client = seeded_client(OperatingMode::ParentDelegated).await;
        assert_eq!(
            client.endpoint("/spend").await.unwrap(),
            format!("{DEAD_URL}/iframe/spend")
        );
    }

    #[tokio::test]
    async fn test_operations_require_a_resolved_mode() {
        let client = client_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        let err = client.get_balance().await.unwrap_err();
        assert!(matches!(err, CreditError::NotInitialized));
    }

    // ==================================================================================================
    // Local validation
    // ==================================================================================================

    #[tokio::test]
    async fn test_spend_validates_before_any_network() {
        let client = seeded_client(OperatingMode::PasswordLogin).await;

        let err = client.spend(&SpendRequest::new(0, "x")).await.unwrap_err();
        assert!(matches!(err, CreditError::InvalidAmount(_)));

        let err = client.spend(&SpendRequest::new(10, "")).await.unwrap_err();
        assert!(matches!(err, CreditError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_add_credits_validates_amount() {
        let client = seeded_client(OperatingMode::PasswordLogin).await;
        let err = client
            .add_credits(&AddCreditsRequest::new(-5))
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::InvalidAmount(_)));
    }

    #[tokio::test]
    async fn test_history_params_validated_before_any_network() {
        let client = seeded_client(OperatingMode::PasswordLogin).await;
        let params = TransactionHistoryParams::default().with_limit(0);
        let err = client.get_transaction_history(&params).await.unwrap_err();
        assert!(matches!(err, CreditError::ValidationError(_)));
    }

    // ==================================================================================================
    // Parent notification
    // ==================================================================================================

    #[tokio::test]
    async fn test_notify_mutation_posts_operation_and_balance() {
        let host = Arc::new(ChannelHost::new());
        let mut posted = host.posted();
        let mut config = Config::new(DEAD_URL);
        config.parent_origin = Some("https://parent.example.com".to_string());
        let client = client_with(config, host.clone());

        client.notify_mutation("spend", &test_outcome(Some(120)));

        let first = posted.try_recv().unwrap();
        assert_eq!(first.target_origin, "https://parent.example.com");
        assert!(matches!(
            first.message,
            ChildMessage::OperationComplete {
                operation: "spend",
                ..
            }
        ));

        let second = posted.try_recv().unwrap();
        assert!(matches!(
            second.message,
            ChildMessage::BalanceUpdate { balance: 120 }
        ));
    }

    #[tokio::test]
    async fn test_notify_mutation_skips_balance_when_absent() {
        let host = Arc::new(ChannelHost::new());
        let mut posted = host.posted();
        let mut config = Config::new(DEAD_URL);
        config.parent_origin = Some("https://parent.example.com".to_string());
        let client = client_with(config, host.clone());

        client.notify_mutation("refund", &test_outcome(None));

        assert!(posted.try_recv().is_ok());
        assert!(matches!(posted.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_notify_requires_configured_origin() {
        let host = Arc::new(ChannelHost::new());
        let mut posted = host.posted();
        let client = client_with(Config::new(DEAD_URL), host.clone());

        client.notify_mutation("spend", &test_outcome(Some(10)));
        assert!(matches!(posted.try_recv(), Err(TryRecvError::Empty)));
    }

    // ==================================================================================================
    // Error refinement
    // ==================================================================================================

    #[test]
    fn test_refine_not_found_rewrites_404_only() {
        let id = TransactionId::Str("tx-1".to_string());

        let refined = refine_not_found(
            CreditError::Api {
                status: 404,
                message: "no such row".to_string(),
            },
            &id,
        );
        match refined {
            CreditError::ValidationError(message) => {
                assert_eq!(message, "Transaction tx-1 not found");
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }

        let untouched = refine_not_found(
            CreditError::Api {
                status: 500,
                message: "boom".to_string(),
            },
            &id,
        );
        assert!(matches!(untouched, CreditError::Api { status: 500, .. }));
    }
}
