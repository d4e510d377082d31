// Event callbacks
// Host applications observe the session through these instead of polling.
// Registration and emission are decoupled so the auth layer and the facade
// can share one registry.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error};

use crate::error::CreditError;
use crate::models::ledger::{Transaction, User};

type AuthenticatedFn = dyn Fn(&User) + Send + Sync;
type BalanceChangedFn = dyn Fn(i64) + Send + Sync;
type TransactionCompleteFn = dyn Fn(&Transaction) + Send + Sync;
type ErrorFn = dyn Fn(&CreditError) + Send + Sync;
type SessionExpiredFn = dyn Fn() + Send + Sync;

#[derive(Default)]
struct Slots {
    authenticated: Option<Arc<AuthenticatedFn>>,
    balance_changed: Option<Arc<BalanceChangedFn>>,
    transaction_complete: Option<Arc<TransactionCompleteFn>>,
    error: Option<Arc<ErrorFn>>,
    session_expired: Option<Arc<SessionExpiredFn>>,
}

/// Callback registry shared across the SDK.
///
/// Cloning shares the registry. One handler per event; registering again
/// replaces the previous handler. Handlers run on whichever task emitted
/// the event, so they should return quickly.
#[derive(Clone, Default)]
pub struct EventHandlers {
    slots: Arc<RwLock<Slots>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================================================================================================
    // Registration
    // ==================================================================================================

    pub fn set_on_authenticated(&self, handler: impl Fn(&User) + Send + Sync + 'static) {
        self.write().authenticated = Some(Arc::new(handler));
    }

    pub fn set_on_balance_changed(&self, handler: impl Fn(i64) + Send + Sync + 'static) {
        self.write().balance_changed = Some(Arc::new(handler));
    }

    pub fn set_on_transaction_complete(
        &self,
        handler: impl Fn(&Transaction) + Send + Sync + 'static,
    ) {
        self.write().transaction_complete = Some(Arc::new(handler));
    }

    pub fn set_on_error(&self, handler: impl Fn(&CreditError) + Send + Sync + 'static) {
        self.write().error = Some(Arc::new(handler));
    }

    pub fn set_on_session_expired(&self, handler: impl Fn() + Send + Sync + 'static) {
        self.write().session_expired = Some(Arc::new(handler));
    }

    // ==================================================================================================
    // Emission
    // ==================================================================================================

    pub(crate) fn emit_authenticated(&self, user: &User) {
        if let Some(handler) = self.read().authenticated.clone() {
            handler(user);
        }
    }

    pub(crate) fn emit_balance_changed(&self, balance: i64) {
        if let Some(handler) = self.read().balance_changed.clone() {
            handler(balance);
        }
    }

    pub(crate) fn emit_transaction_complete(&self, transaction: &Transaction) {
        if let Some(handler) = self.read().transaction_complete.clone() {
            handler(transaction);
        }
    }

    pub(crate) fn emit_error(&self, err: &CreditError) {
        match self.read().error.clone() {
            Some(handler) => handler(err),
            // Errors still reach the logs when nobody is listening
            None => error!(code = err.code(), error = %err, "unhandled SDK error"),
        }
    }

    pub(crate) fn emit_session_expired(&self) {
        match self.read().session_expired.clone() {
            Some(handler) => handler(),
            None => debug!("session expired with no handler registered"),
        }
    }

    // Lock poisoning only happens if a registration panicked mid-write;
    // the slot table is still usable, so recover instead of unwrapping.
    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
