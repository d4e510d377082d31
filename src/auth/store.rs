// Credential storage
// One credential per session; clones of the store share state

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::auth::types::Credential;
use crate::error::{CreditError, Result};
use crate::models::ledger::User;

#[derive(Clone, Default)]
pub struct TokenStore {
    credential: Arc<RwLock<Option<Credential>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a credential. One whose expiry has already passed is refused;
    /// an expired credential must never become the session's identity.
    pub async fn set(&self, credential: Credential) -> Result<()> {
        if let Some(expires_at) = credential.expires_at {
            if expires_at <= Utc::now() {
                return Err(CreditError::TokenExpired);
            }
        }
        *self.credential.write().await = Some(credential);
        Ok(())
    }

    pub async fn clear(&self) {
        *self.credential.write().await = None;
    }

    pub async fn credential(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    pub async fn token(&self) -> Option<String> {
        self.credential
            .read()
            .await
            .as_ref()
            .map(|c| c.token.clone())
    }

    pub async fn user(&self) -> Option<User> {
        self.credential
            .read()
            .await
            .as_ref()
            .map(|c| c.user.clone())
    }

    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential.read().await.as_ref().and_then(|c| c.expires_at)
    }

    /// True when a credential exists and stays valid for at least `skew`
    /// from now. Read-only; expired credentials are cleaned up by the
    /// session manager, not here.
    pub async fn is_authenticated(&self, skew: Duration) -> bool {
        match self.credential.read().await.as_ref() {
            None => false,
            Some(credential) => match credential.expires_at {
                None => true,
                Some(expires_at) => Utc::now() < expires_at - skew,
            },
        }
    }
}
