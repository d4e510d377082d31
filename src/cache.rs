// Balance cache
// Keeps the last fetched balance for a short window so bursts of
// reads do not each hit the ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// How long a fetched balance stays servable from memory
pub(crate) const BALANCE_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
struct CachedBalance {
    balance: i64,
    fetched_at: DateTime<Utc>,
}

/// Thread-safe single-value cache for the account balance.
///
/// Mutations invalidate it, after which a background refresh re-populates
/// it; `refreshing` is the single-flight guard for that refresh.
pub struct BalanceCache {
    entry: Arc<RwLock<Option<CachedBalance>>>,
    refreshing: Arc<AtomicBool>,
    ttl: Duration,
}

impl BalanceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Arc::new(RwLock::new(None)),
            refreshing: Arc::new(AtomicBool::new(false)),
            ttl,
        }
    }

    /// Returns the cached balance if one is stored and still fresh.
    pub fn get(&self) -> Option<i64> {
        let entry = self
            .entry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cached = (*entry)?;
        if self.is_fresh(&cached) {
            Some(cached.balance)
        } else {
            None
        }
    }

    pub fn put(&self, balance: i64) {
        let mut entry = self
            .entry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *entry = Some(CachedBalance {
            balance,
            fetched_at: Utc::now(),
        });
    }

    pub fn invalidate(&self) {
        let mut entry = self
            .entry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *entry = None;
    }

    /// Claims the refresh slot. Returns false while another refresh owns it.
    pub fn try_begin_refresh(&self) -> bool {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_refresh(&self) {
        self.refreshing.store(false, Ordering::Release);
    }

    fn is_fresh(&self, cached: &CachedBalance) -> bool {
        match (Utc::now() - cached.fetched_at).to_std() {
            Ok(age) => age < self.ttl,
            // A backwards clock jump makes the entry look future-dated;
            // serve it rather than refetch in a loop.
            Err(_) => true,
        }
    }
}

impl Clone for BalanceCache {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            refreshing: Arc::clone(&self.refreshing),
            ttl: self.ttl,
        }
    }
}
