// Credit system facade
// The single entry point embedders construct. Wires the session manager,
// the ledger client, the balance cache and the event registry together,
// and owns the background listener for parent-container messages.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::{OperatingMode, SessionManager, SessionState};
use crate::cache::{BalanceCache, BALANCE_CACHE_TTL};
use crate::client::ApiClient;
use crate::config::Config;
use crate::error::{CreditError, Result};
use crate::events::EventHandlers;
use crate::host::{DetachedHost, HostContext, MessageSubscription};
use crate::http::LedgerHttpClient;
use crate::models::ledger::{
    AddCreditsRequest, SpendRequest, Transaction, TransactionHistory, TransactionHistoryParams,
    TransactionId, TransactionOutcome, User,
};
use crate::models::messages::ParentMessage;

/// High-level credit system client.
///
/// Construct once, call [`initialize`](Self::initialize), then use the
/// ledger operations. All methods take `&self`; share the instance behind
/// an [`Arc`] when multiple tasks need it.
pub struct CreditSystem {
    config: Arc<Config>,
    session: SessionManager,
    api: ApiClient,
    cache: BalanceCache,
    events: EventHandlers,
    host: Arc<dyn HostContext>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

// Manual because the handler slots and host are opaque trait objects.
impl std::fmt::Debug for CreditSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditSystem").finish_non_exhaustive()
    }
}

impl CreditSystem {
    /// Builds a standalone credit system with no parent container.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_host(config, Arc::new(DetachedHost))
    }

    /// Builds a credit system wired to an embedding host. Configuration is
    /// validated eagerly so a bad setup fails at construction, not first use.
    pub fn with_host(config: Config, host: Arc<dyn HostContext>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config.normalized());

        let events = EventHandlers::new();
        let session = SessionManager::new(Arc::clone(&config), Arc::clone(&host), events.clone())?;
        let http = LedgerHttpClient::new(session.clone(), &config)?;
        let api = ApiClient::new(http, session.clone(), Arc::clone(&host), &config);

        Ok(Self {
            config,
            session,
            api,
            cache: BalanceCache::new(BALANCE_CACHE_TTL),
            events,
            host,
            listener: Mutex::new(None),
        })
    }

    /// Resolves the operating mode and, in an embedded session, performs the
    /// credential handoff with the parent. Must be called before any ledger
    /// operation; calling it again is a no-op.
    ///
    /// When initialization ends authenticated (a successful handoff), the
    /// `authenticated` event fires and the balance cache is warmed in the
    /// background.
    pub async fn initialize(&self) -> Result<()> {
        // Subscribe before the handoff so parent pushes sent during
        // initialization are not lost.
        if self.host.is_nested() {
            self.spawn_parent_listener();
        }

        self.report(self.session.initialize().await)?;

        if self.session.is_authenticated().await {
            if let Some(user) = self.session.user().await {
                self.events.emit_authenticated(&user);
            }
            self.refresh_balance_silently();
        }
        info!("credit system initialized");
        Ok(())
    }

    // ---- authentication

    /// Email/password login against the ledger.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let user = self.report(self.session.authenticate(email, password).await)?;
        self.events.emit_authenticated(&user);
        self.refresh_balance_silently();
        Ok(user)
    }

    /// Login with a pre-issued token. The token is validated against the
    /// backend before the session accepts it.
    pub async fn login_with_token(&self, token: &str) -> Result<User> {
        let user = self.report(self.session.authenticate_with_token(token, false).await)?;
        self.events.emit_authenticated(&user);
        self.refresh_balance_silently();
        Ok(user)
    }

    /// Login with a token handed over by a trusted parent container,
    /// skipping backend validation unless the configuration demands it.
    pub async fn login_with_delegated_token(
        &self,
        token: &str,
        expires_at: Option<DateTime<Utc>>,
        user: User,
    ) -> Result<User> {
        let user = self.report(
            self.session
                .authenticate_delegated(token, expires_at, user)
                .await,
        )?;
        self.events.emit_authenticated(&user);
        self.refresh_balance_silently();
        Ok(user)
    }

    /// Ends the session and drops the cached balance.
    pub async fn logout(&self) {
        self.session.logout().await;
        self.cache.invalidate();
        info!("user logged out");
    }

    /// Forces a token refresh outside the scheduled cycle.
    pub async fn refresh_token(&self) -> Result<()> {
        self.session.ensure_authenticated().await?;
        let result = self.report(self.session.refresh().await);
        if result.is_ok() {
            info!("token refreshed manually");
        }
        result
    }

    // ---- ledger operations

    /// Current balance, served from cache when a fresh value exists.
    pub async fn get_balance(&self) -> Result<i64> {
        self.get_balance_with(true).await
    }

    /// Current balance straight from the ledger, bypassing the cache.
    pub async fn get_balance_fresh(&self) -> Result<i64> {
        self.get_balance_with(false).await
    }

    async fn get_balance_with(&self, use_cache: bool) -> Result<i64> {
        self.session.ensure_authenticated().await?;

        if use_cache {
            if let Some(balance) = self.cache.get() {
                debug!(balance, "serving balance from cache");
                return Ok(balance);
            }
        }

        let balance = self.report(self.api.get_balance().await)?;
        self.cache.put(balance.balance);
        self.events.emit_balance_changed(balance.balance);
        Ok(balance.balance)
    }

    /// True when the current balance covers `amount`.
    pub async fn has_sufficient_credits(&self, amount: i64) -> Result<bool> {
        Ok(self.get_balance().await? >= amount)
    }

    /// Spends credits and returns the recorded transaction.
    pub async fn spend(&self, request: &SpendRequest) -> Result<Transaction> {
        self.session.ensure_authenticated().await?;
        let outcome = self.report(self.api.spend(request).await)?;
        Ok(self.finish_mutation(outcome))
    }

    /// Adds credits and returns the recorded transaction.
    pub async fn add_credits(&self, request: &AddCreditsRequest) -> Result<Transaction> {
        self.session.ensure_authenticated().await?;
        let outcome = self.report(self.api.add_credits(request).await)?;
        Ok(self.finish_mutation(outcome))
    }

    /// Pages through past transactions.
    pub async fn get_transaction_history(
        &self,
        params: &TransactionHistoryParams,
    ) -> Result<TransactionHistory> {
        self.session.ensure_authenticated().await?;
        self.report(self.api.get_transaction_history(params).await)
    }

    /// Looks up a single transaction.
    pub async fn get_transaction(&self, id: &TransactionId) -> Result<Transaction> {
        self.session.ensure_authenticated().await?;
        self.report(self.api.get_transaction(id).await)
    }

    /// Reverses a completed transaction.
    pub async fn refund_transaction(
        &self,
        id: &TransactionId,
        reason: Option<String>,
    ) -> Result<Transaction> {
        self.session.ensure_authenticated().await?;
        let outcome = self.report(self.api.refund_transaction(id, reason).await)?;
        Ok(self.finish_mutation(outcome))
    }

    // ---- session queries

    pub async fn is_authenticated(&self) -> bool {
        self.session.is_authenticated().await
    }

    pub async fn user(&self) -> Option<User> {
        self.session.user().await
    }

    pub async fn auth_mode(&self) -> Option<OperatingMode> {
        self.session.mode().await
    }

    pub async fn session_state(&self) -> SessionState {
        self.session.state().await
    }

    /// Whether a parent container exists above this session.
    pub fn is_nested(&self) -> bool {
        self.host.is_nested()
    }

    /// Direct access to the session manager for advanced integrations.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    // ---- event registration

    pub fn on_authenticated(&self, handler: impl Fn(&User) + Send + Sync + 'static) {
        self.events.set_on_authenticated(handler);
    }

    pub fn on_balance_changed(&self, handler: impl Fn(i64) + Send + Sync + 'static) {
        self.events.set_on_balance_changed(handler);
    }

    pub fn on_transaction_complete(&self, handler: impl Fn(&Transaction) + Send + Sync + 'static) {
        self.events.set_on_transaction_complete(handler);
    }

    pub fn on_error(&self, handler: impl Fn(&CreditError) + Send + Sync + 'static) {
        self.events.set_on_error(handler);
    }

    pub fn on_session_expired(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.events.set_on_session_expired(handler);
    }

    // ---- internals

    /// Routes a failure to the error handler before handing it back.
    fn report<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.events.emit_error(err);
        }
        result
    }

    /// Post-mutation bookkeeping: the cached balance is stale, listeners
    /// want the transaction, and a background read re-warms the cache.
    fn finish_mutation(&self, outcome: TransactionOutcome) -> Transaction {
        self.cache.invalidate();
        self.events.emit_transaction_complete(&outcome.transaction);
        self.refresh_balance_silently();
        outcome.transaction
    }

    /// Re-fetches the balance in the background. Collapses to a no-op while
    /// a previous silent refresh is still running; failures stay quiet.
    fn refresh_balance_silently(&self) {
        if !self.cache.try_begin_refresh() {
            return;
        }
        let api = self.api.clone();
        let cache = self.cache.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            match api.get_balance().await {
                Ok(balance) => {
                    cache.put(balance.balance);
                    events.emit_balance_changed(balance.balance);
                }
                Err(err) => debug!(error = %err, "silent balance refresh failed"),
            }
            cache.end_refresh();
        });
    }

    fn spawn_parent_listener(&self) {
        let mut slot = self.listener_slot();
        if slot.is_some() {
            return;
        }
        let subscription = self.host.subscribe();
        *slot = Some(tokio::spawn(run_parent_listener(
            subscription,
            self.config.parent_origin.clone(),
            self.cache.clone(),
            self.events.clone(),
        )));
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for CreditSystem {
    fn drop(&mut self) {
        if let Some(handle) = self.listener_slot().take() {
            handle.abort();
        }
    }
}

/// Applies parent-container pushes for the lifetime of the subscription:
/// balance updates land in the cache, error notices reach the error handler.
async fn run_parent_listener(
    mut subscription: MessageSubscription,
    expected_origin: Option<String>,
    cache: BalanceCache,
    events: EventHandlers,
) {
    while let Some(envelope) = subscription.recv().await {
        if let Some(expected) = expected_origin.as_deref() {
            if envelope.origin != expected {
                warn!(origin = %envelope.origin, "dropped parent message from unexpected origin");
                continue;
            }
        }
        let message: ParentMessage = match serde_json::from_value(envelope.payload) {
            Ok(message) => message,
            Err(err) => {
                debug!(error = %err, "ignoring unparseable parent message");
                continue;
            }
        };
        match message {
            ParentMessage::BalanceUpdate { balance } => {
                debug!(balance, "balance pushed by parent");
                cache.put(balance);
                events.emit_balance_changed(balance);
            }
            ParentMessage::AuthenticationError { error } => {
                events.emit_error(&CreditError::AuthenticationFailed(error));
            }
            ParentMessage::Error { error } => {
                events.emit_error(&CreditError::from_failed_envelope(&error));
            }
            // Credential handoffs are consumed by the delegation wait
            ParentMessage::JwtToken { .. } | ParentMessage::Other => {}
        }
    }
    debug!("parent message channel closed, listener stopped");
}
