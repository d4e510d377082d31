// Session manager
// Owns the credential lifecycle: mode resolution at startup, acquisition,
// installation with scheduled renewal, single-flight refresh, expiry
// handling and logout. Every other part of the SDK asks this type whether
// a usable credential exists.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::auth::acquirer::CredentialAcquirer;
use crate::auth::jwt;
use crate::auth::scheduler::RefreshScheduler;
use crate::auth::store::TokenStore;
use crate::auth::types::{Credential, OperatingMode, SessionState};
use crate::config::{AuthMode, Config};
use crate::error::{CreditError, Result};
use crate::events::EventHandlers;
use crate::host::HostContext;
use crate::models::ledger::User;
use crate::models::messages::ChildMessage;

/// Manages the authentication session.
///
/// Cloning is cheap and clones share the same session. The manager never
/// installs a half-valid credential: acquisition either completes fully
/// (stored, renewal scheduled, parent notified) or leaves the previous
/// session untouched, and a failed refresh ends the session cleanly.
#[derive(Clone)]
pub struct SessionManager {
    config: Arc<Config>,
    host: Arc<dyn HostContext>,
    store: TokenStore,
    scheduler: RefreshScheduler,
    acquirer: CredentialAcquirer,
    events: EventHandlers,
    state: Arc<RwLock<SessionState>>,
    mode: Arc<RwLock<Option<OperatingMode>>>,
    // Serializes refresh attempts; the epoch lets queued callers adopt the
    // winner's outcome instead of refreshing again.
    refresh_lock: Arc<Mutex<()>>,
    refresh_epoch: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new(
        config: Arc<Config>,
        host: Arc<dyn HostContext>,
        events: EventHandlers,
    ) -> Result<Self> {
        let acquirer = CredentialAcquirer::new(&config, host.clone())?;
        Ok(Self {
            config,
            host,
            store: TokenStore::new(),
            scheduler: RefreshScheduler::new(),
            acquirer,
            events,
            state: Arc::new(RwLock::new(SessionState::Uninitialized)),
            mode: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
            refresh_epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    // ==================================================================================================
    // Startup
    // ==================================================================================================

    /// Resolves the operating mode and, in delegated mode, performs the
    /// credential handoff with the parent container.
    ///
    /// Idempotent: calls after the first return immediately. A delegation
    /// failure never propagates; the session falls back to password login
    /// and starts unauthenticated.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != SessionState::Uninitialized {
                debug!("session already initialized");
                return Ok(());
            }
            *state = SessionState::Initializing;
        }

        let resolved = self.resolve_mode();
        info!(auth_mode = %self.config.auth_mode, mode = %resolved, "initializing session");

        let (final_mode, final_state) = if resolved == OperatingMode::ParentDelegated {
            match self.delegated_startup().await {
                Ok(user) => {
                    info!(user_id = %user.id, "delegated authentication successful");
                    (OperatingMode::ParentDelegated, SessionState::Authenticated)
                }
                Err(err) => {
                    warn!(error = %err, "delegated authentication failed, falling back to password login");
                    (OperatingMode::PasswordLogin, SessionState::Unauthenticated)
                }
            }
        } else {
            (resolved, SessionState::Unauthenticated)
        };

        *self.mode.write().await = Some(final_mode);
        *self.state.write().await = final_state;
        Ok(())
    }

    fn resolve_mode(&self) -> OperatingMode {
        match self.config.auth_mode {
            AuthMode::Standalone => OperatingMode::PasswordLogin,
            AuthMode::Jwt => OperatingMode::ParentDelegated,
            AuthMode::Auto => {
                if self.host.is_nested() {
                    OperatingMode::ParentDelegated
                } else {
                    OperatingMode::PasswordLogin
                }
            }
        }
    }

    async fn delegated_startup(&self) -> Result<User> {
        if !self.host.is_nested() {
            return Err(CreditError::InvalidConfiguration(
                "jwt mode requires a parent container".to_string(),
            ));
        }
        let credential = self.acquirer.by_delegation().await?;
        let credential = if self.config.validate_delegated_tokens {
            self.acquirer
                .by_token(&credential.token, false, OperatingMode::ParentDelegated)
                .await?
        } else {
            credential
        };
        let user = credential.user.clone();
        self.install(credential).await?;
        Ok(user)
    }

    // ==================================================================================================
    // Authentication
    // ==================================================================================================

    /// Password login. On success the session switches to password-login
    /// mode; on failure any previous session is left untouched.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        self.ensure_initialized().await?;
        let credential = self.acquirer.by_password(email, password).await?;
        let user = credential.user.clone();
        self.install(credential).await?;
        *self.mode.write().await = Some(OperatingMode::PasswordLogin);
        *self.state.write().await = SessionState::Authenticated;
        info!(user_id = %user.id, "authenticated with password");
        Ok(user)
    }

    /// Authenticates with a caller-supplied token. With `trust_embedded_claims`
    /// the token's own claims may stand in for a backend validation round trip.
    pub async fn authenticate_with_token(
        &self,
        token: &str,
        trust_embedded_claims: bool,
    ) -> Result<User> {
        self.ensure_initialized().await?;
        // A delegated session keeps its routing; otherwise the token makes
        // this a pre-issued-token session.
        let mode = match self.mode().await {
            Some(OperatingMode::ParentDelegated) => OperatingMode::ParentDelegated,
            _ => OperatingMode::PreIssuedToken,
        };
        let credential = self
            .acquirer
            .by_token(token, trust_embedded_claims, mode)
            .await?;
        let user = credential.user.clone();
        self.install(credential).await?;
        *self.mode.write().await = Some(mode);
        *self.state.write().await = SessionState::Authenticated;
        info!(user_id = %user.id, mode = %mode, "authenticated with token");
        Ok(user)
    }

    /// Adopts a credential the parent container already handed over out of
    /// band. Unless delegated tokens are configured to be re-validated, no
    /// network call is made. A missing expiry is recovered from the token
    /// itself when it is a decodable JWT.
    pub async fn authenticate_delegated(
        &self,
        token: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
        user: User,
    ) -> Result<User> {
        self.ensure_initialized().await?;
        let credential = if self.config.validate_delegated_tokens {
            self.acquirer
                .by_token(token, false, OperatingMode::ParentDelegated)
                .await?
        } else {
            let expires_at = match expires_at {
                Some(expiry) => Some(expiry),
                None => jwt::decode_claims(token)
                    .ok()
                    .and_then(|claims| claims.expires_at().ok().flatten()),
            };
            Credential {
                token: token.to_string(),
                expires_at,
                user,
            }
        };
        let user = credential.user.clone();
        self.install(credential).await?;
        *self.mode.write().await = Some(OperatingMode::ParentDelegated);
        *self.state.write().await = SessionState::Authenticated;
        info!(user_id = %user.id, "adopted delegated credentials");
        Ok(user)
    }

    // ==================================================================================================
    // Refresh
    // ==================================================================================================

    /// Exchanges the current token for a renewed one.
    ///
    /// Concurrent calls collapse onto one in-flight attempt: whoever holds
    /// the lock refreshes, queued callers adopt that outcome. In
    /// password-login mode there is no refresh endpoint, so the session
    /// ends and the application must log in again. Any refresh failure
    /// leaves a clean unauthenticated session, never a half-valid one.
    pub async fn refresh(&self) -> Result<()> {
        let epoch = self.refresh_epoch.load(Ordering::Acquire);
        let _in_flight = self.refresh_lock.lock().await;
        if self.refresh_epoch.load(Ordering::Acquire) != epoch {
            // Another refresh completed while this call waited for the lock.
            return if self.store.credential().await.is_some() {
                Ok(())
            } else {
                Err(CreditError::TokenExpired)
            };
        }
        let outcome = self.refresh_locked().await;
        self.refresh_epoch.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn refresh_locked(&self) -> Result<()> {
        let Some(credential) = self.store.credential().await else {
            return Err(CreditError::AuthenticationFailed(
                "No token to refresh".to_string(),
            ));
        };
        let Some(mode) = self.mode().await else {
            return Err(CreditError::NotInitialized);
        };

        if !mode.supports_remote_refresh() {
            warn!(mode = %mode, "no refresh endpoint in this mode, ending session");
            self.expire_session().await;
            return Err(CreditError::TokenExpired);
        }

        *self.state.write().await = SessionState::Refreshing;
        match self.acquirer.refresh_remote(&credential.token, mode).await {
            Ok(renewed) => {
                let refreshed = Credential {
                    token: renewed.token,
                    expires_at: renewed.expires_at,
                    user: credential.user,
                };
                if let Err(err) = self.store_and_schedule(&refreshed).await {
                    error!(error = %err, "refresh produced an unusable credential, ending session");
                    self.expire_session().await;
                    return Err(err);
                }
                *self.state.write().await = SessionState::Authenticated;
                info!("token refreshed");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "token refresh failed, ending session");
                self.expire_session().await;
                Err(err)
            }
        }
    }

    // Boxed rather than `async fn`: this future is recursive (refresh stores
    // the renewed credential, which re-arms the scheduler with this callback),
    // so the type must be erased to stay finite.
    fn scheduled_refresh(
        &self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            debug!("scheduled token refresh due");
            if let Err(err) = self.refresh().await {
                error!(error = %err, "scheduled token refresh failed");
            }
        })
    }

    // ==================================================================================================
    // Teardown
    // ==================================================================================================

    /// Ends the session. Safe to call from any state; cancels any pending
    /// refresh so nothing fires across the session boundary.
    pub async fn logout(&self) {
        self.scheduler.disarm().await;
        self.store.clear().await;
        *self.state.write().await = SessionState::LoggedOut;
        info!("logged out");
    }

    async fn expire_session(&self) {
        self.scheduler.disarm().await;
        self.store.clear().await;
        *self.state.write().await = SessionState::Unauthenticated;
        warn!("session expired");
        self.events.emit_session_expired();
    }

    // ==================================================================================================
    // Guards and queries
    // ==================================================================================================

    /// Fails until `initialize()` has completed.
    pub async fn ensure_initialized(&self) -> Result<()> {
        match *self.state.read().await {
            SessionState::Uninitialized | SessionState::Initializing => {
                Err(CreditError::NotInitialized)
            }
            _ => Ok(()),
        }
    }

    /// Fails unless a live credential exists. A credential found expired is
    /// destroyed on sight, ending the session, before the call is rejected.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        self.ensure_initialized().await?;
        let Some(credential) = self.store.credential().await else {
            return Err(CreditError::AuthenticationFailed(
                "User is not authenticated".to_string(),
            ));
        };
        if let Some(expires_at) = credential.expires_at {
            if expires_at <= Utc::now() {
                self.expire_session().await;
                return Err(CreditError::TokenExpired);
            }
        }
        Ok(())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.is_authenticated(chrono::Duration::zero()).await
    }

    pub async fn user(&self) -> Option<User> {
        self.store.user().await
    }

    pub async fn token(&self) -> Option<String> {
        self.store.token().await
    }

    pub async fn mode(&self) -> Option<OperatingMode> {
        *self.mode.read().await
    }

    /// Lifecycle state, with expiry derived from the stored credential
    /// rather than tracked by a timer.
    pub async fn state(&self) -> SessionState {
        let state = *self.state.read().await;
        if state == SessionState::Authenticated
            && !self.store.is_authenticated(chrono::Duration::zero()).await
        {
            return SessionState::Expired;
        }
        state
    }

    /// Route prefix for ledger endpoints in the current mode.
    pub async fn route_prefix(&self) -> Result<&'static str> {
        self.mode()
            .await
            .map(|mode| mode.route_prefix())
            .ok_or(CreditError::NotInitialized)
    }

    pub(crate) fn auto_refresh_enabled(&self) -> bool {
        self.config.auto_refresh_token
    }

    // ==================================================================================================
    // Internals
    // ==================================================================================================

    /// Stores the credential and schedules its renewal. Replacing a
    /// credential always cancels the previous renewal timer first, so a
    /// credential without an expiry ends up with no timer at all.
    async fn store_and_schedule(&self, credential: &Credential) -> Result<()> {
        self.scheduler.disarm().await;
        self.store.set(credential.clone()).await?;

        if self.config.auto_refresh_token {
            if let Some(expires_at) = credential.expires_at {
                let buffer = chrono::Duration::from_std(self.config.token_refresh_buffer)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                let session = self.clone();
                self.scheduler
                    .arm(expires_at, buffer, move || async move {
                        session.scheduled_refresh().await;
                    })
                    .await;
            }
        }
        Ok(())
    }

    async fn install(&self, credential: Credential) -> Result<()> {
        self.store_and_schedule(&credential).await?;
        self.announce(&credential.user);
        Ok(())
    }

    /// Reports the authenticated principal up to the parent container.
    fn announce(&self, user: &User) {
        if !self.host.is_nested() {
            return;
        }
        if let Some(origin) = self.config.parent_origin.as_deref() {
            self.host.post_to_parent(
                ChildMessage::UserCredentials { user: user.clone() },
                origin,
            );
        }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub async fn seed_for_testing(
        &self,
        credential: Credential,
        mode: OperatingMode,
    ) -> Result<()> {
        *self.mode.write().await = Some(mode);
        self.store_and_schedule(&credential).await?;
        *self.state.write().await = SessionState::Authenticated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::encode_unsigned;
    use crate::host::{ChannelHost, DetachedHost};
    use crate::models::ledger::UserId;
    use serde_json::json;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration as StdDuration;

    // Unreachable on purpose: these tests must never touch the network.
    const DEAD_URL: &str = "http://127.0.0.1:9";

    fn test_user() -> User {
        User {
            id: UserId::Int(42),
            name: Some("Grace".to_string()),
            email: Some("grace@example.com".to_string()),
        }
    }

    fn test_credential(expires_in: chrono::Duration) -> Credential {
        Credential {
            token: "tok-1".to_string(),
            expires_at: Some(Utc::now() + expires_in),
            user: test_user(),
        }
    }

    fn manager_with(
        config: Config,
        host: Arc<dyn HostContext>,
    ) -> (SessionManager, Arc<AtomicBool>) {
        let events = EventHandlers::new();
        let expired = Arc::new(AtomicBool::new(false));
        let flag = expired.clone();
        events.set_on_session_expired(move || flag.store(true, Ordering::SeqCst));
        let manager = SessionManager::new(Arc::new(config.normalized()), host, events).unwrap();
        (manager, expired)
    }

    async fn settle() {
        for _ in 0..25 {
            tokio::task::yield_now().await;
        }
    }

    // ==================================================================================================
    // Initialization and mode resolution
    // ==================================================================================================

    #[tokio::test]
    async fn test_initialize_detached_resolves_password_login() {
        let (manager, _) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));

        manager.initialize().await.unwrap();
        assert_eq!(manager.mode().await, Some(OperatingMode::PasswordLogin));
        assert_eq!(manager.state().await, SessionState::Unauthenticated);
        assert!(!manager.is_authenticated().await);

        // Second call is a no-op
        manager.initialize().await.unwrap();
        assert_eq!(manager.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_initialize_jwt_mode_without_parent_falls_back() {
        let mut config = Config::new(DEAD_URL);
        config.auth_mode = AuthMode::Jwt;
        let (manager, _) = manager_with(config, Arc::new(DetachedHost));

        manager.initialize().await.unwrap();
        assert_eq!(manager.mode().await, Some(OperatingMode::PasswordLogin));
        assert_eq!(manager.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_delegated_handoff_authenticates() {
        let host = Arc::new(ChannelHost::new());
        let mut posted = host.posted();
        let mut config = Config::new(DEAD_URL);
        config.parent_origin = Some("https://parent.example.com".to_string());
        let (manager, _) = manager_with(config, host.clone());

        let responder_host = host.clone();
        tokio::spawn(async move {
            posted.recv().await.unwrap();
            responder_host.deliver(
                "https://parent.example.com",
                json!({
                    "type": "JWT_TOKEN",
                    "token": "abc.def.ghi",
                    "expiresAt": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                    "user": { "id": 42, "name": "Grace", "email": "grace@example.com" }
                }),
            );
        });

        manager.initialize().await.unwrap();
        assert_eq!(manager.mode().await, Some(OperatingMode::ParentDelegated));
        assert_eq!(manager.state().await, SessionState::Authenticated);
        assert!(manager.is_authenticated().await);
        assert_eq!(manager.token().await.as_deref(), Some("abc.def.ghi"));
        assert_eq!(manager.user().await.unwrap().id.to_string(), "42");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_announces_credentials_to_parent() {
        let host = Arc::new(ChannelHost::new());
        let mut posted = host.posted();
        let mut config = Config::new(DEAD_URL);
        config.parent_origin = Some("https://parent.example.com".to_string());
        let (manager, _) = manager_with(config, host.clone());

        let responder_host = host.clone();
        tokio::spawn(async move {
            responder_host.deliver(
                "https://parent.example.com",
                json!({ "type": "JWT_TOKEN", "token": "abc.def.ghi", "user": { "id": 42 } }),
            );
        });

        manager.initialize().await.unwrap();

        // First the request went up, then the accepted principal
        let first = posted.recv().await.unwrap();
        assert!(matches!(
            first.message,
            ChildMessage::RequestCredentials { .. }
        ));
        let second = posted.recv().await.unwrap();
        assert!(matches!(second.message, ChildMessage::UserCredentials { .. }));
        assert_eq!(second.target_origin, "https://parent.example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_delegation_timeout_falls_back() {
        let host = Arc::new(ChannelHost::new());
        let mut config = Config::new(DEAD_URL);
        config.auth_mode = AuthMode::Jwt;
        config.delegation_timeout = StdDuration::from_millis(100);
        let (manager, _) = manager_with(config, host);

        manager.initialize().await.unwrap();
        assert_eq!(manager.mode().await, Some(OperatingMode::PasswordLogin));
        assert_eq!(manager.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_operations_require_initialize() {
        let (manager, _) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));

        let err = manager.authenticate("a@b.co", "pw").await.unwrap_err();
        assert!(matches!(err, CreditError::NotInitialized));

        let err = manager.ensure_authenticated().await.unwrap_err();
        assert!(matches!(err, CreditError::NotInitialized));
    }

    // ==================================================================================================
    // Refresh
    // ==================================================================================================

    #[tokio::test]
    async fn test_refresh_without_token_fails_fast() {
        let (manager, expired) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        manager.initialize().await.unwrap();

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, CreditError::AuthenticationFailed(_)));
        assert!(!expired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_password_mode_refresh_ends_session() {
        let (manager, expired) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        manager
            .seed_for_testing(
                test_credential(chrono::Duration::hours(1)),
                OperatingMode::PasswordLogin,
            )
            .await
            .unwrap();
        assert!(manager.is_authenticated().await);

        let err = manager.refresh().await.unwrap_err();
        assert!(matches!(err, CreditError::TokenExpired));
        assert!(!manager.is_authenticated().await);
        assert_eq!(manager.state().await, SessionState::Unauthenticated);
        assert!(expired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_fires_after_buffer() {
        let mut config = Config::new(DEAD_URL);
        config.token_refresh_buffer = StdDuration::from_secs(1);
        let (manager, expired) = manager_with(config, Arc::new(DetachedHost));

        // Expires in 5s with a 1s buffer: renewal is due at ~4s. Password
        // mode has no refresh endpoint, so the due refresh ends the session,
        // which is the observable effect.
        manager
            .seed_for_testing(
                test_credential(chrono::Duration::seconds(5)),
                OperatingMode::PasswordLogin,
            )
            .await
            .unwrap();

        tokio::time::advance(StdDuration::from_millis(3900)).await;
        settle().await;
        assert!(!expired.load(Ordering::SeqCst));

        tokio::time::advance(StdDuration::from_millis(200)).await;
        settle().await;
        assert!(expired.load(Ordering::SeqCst));
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_cancels_scheduled_refresh() {
        let mut config = Config::new(DEAD_URL);
        config.token_refresh_buffer = StdDuration::from_secs(1);
        let (manager, expired) = manager_with(config, Arc::new(DetachedHost));

        manager
            .seed_for_testing(
                test_credential(chrono::Duration::seconds(5)),
                OperatingMode::PasswordLogin,
            )
            .await
            .unwrap();
        manager.logout().await;
        assert!(!manager.is_authenticated().await);
        assert_eq!(manager.state().await, SessionState::LoggedOut);

        tokio::time::advance(StdDuration::from_secs(10)).await;
        settle().await;
        assert!(!expired.load(Ordering::SeqCst));
    }

    // ==================================================================================================
    // Guards
    // ==================================================================================================

    #[tokio::test]
    async fn test_expired_credential_destroyed_on_sight() {
        let (manager, expired) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        manager
            .seed_for_testing(
                test_credential(chrono::Duration::milliseconds(50)),
                OperatingMode::PreIssuedToken,
            )
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(80)).await;
        assert_eq!(manager.state().await, SessionState::Expired);

        let err = manager.ensure_authenticated().await.unwrap_err();
        assert!(matches!(err, CreditError::TokenExpired));
        assert!(expired.load(Ordering::SeqCst));
        assert!(manager.token().await.is_none());
        assert_eq!(manager.state().await, SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_guard_rejects_when_never_authenticated() {
        let (manager, _) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        manager.initialize().await.unwrap();

        let err = manager.ensure_authenticated().await.unwrap_err();
        match err {
            CreditError::AuthenticationFailed(message) => {
                assert_eq!(message, "User is not authenticated")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_with_expired_jwt_rejected_offline() {
        let (manager, _) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        manager.initialize().await.unwrap();

        let exp = (Utc::now() - chrono::Duration::hours(1)).timestamp();
        let token = encode_unsigned(&json!({ "exp": exp }));
        let err = manager
            .authenticate_with_token(&token, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CreditError::TokenExpired));
        assert!(!manager.is_authenticated().await);
    }

    #[tokio::test]
    async fn test_delegated_adoption_recovers_expiry_from_token() {
        let (manager, _) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        manager.initialize().await.unwrap();

        let exp = Utc::now() + chrono::Duration::hours(2);
        let token = encode_unsigned(&json!({ "exp": exp.timestamp() }));
        manager
            .authenticate_delegated(&token, None, test_user())
            .await
            .unwrap();

        assert!(manager.is_authenticated().await);
        assert_eq!(manager.mode().await, Some(OperatingMode::ParentDelegated));
        assert_eq!(manager.route_prefix().await.unwrap(), "/iframe");
    }

    #[tokio::test]
    async fn test_logout_allows_reauthentication() {
        let (manager, _) = manager_with(Config::new(DEAD_URL), Arc::new(DetachedHost));
        manager.initialize().await.unwrap();
        manager
            .seed_for_testing(
                test_credential(chrono::Duration::hours(1)),
                OperatingMode::PreIssuedToken,
            )
            .await
            .unwrap();
        manager.logout().await;

        // The guard no longer passes, but initialization stands
        assert!(manager.ensure_initialized().await.is_ok());
        let err = manager.ensure_authenticated().await.unwrap_err();
        assert!(matches!(err, CreditError::AuthenticationFailed(_)));
    }
}
