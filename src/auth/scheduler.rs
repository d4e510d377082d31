// Refresh scheduling
// At most one timer is live per scheduler; arming replaces the previous one

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone, Default)]
pub struct RefreshScheduler {
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RefreshScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer to run `callback` at `expires_at - buffer`. A due time
    /// already in the past still goes through the runtime, so the callback
    /// fires on the next tick rather than inline.
    pub async fn arm<F, Fut>(&self, expires_at: DateTime<Utc>, buffer: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let delay = ((expires_at - Utc::now()) - buffer)
            .max(Duration::zero())
            .to_std()
            .unwrap_or_default();

        let mut slot = self.timer.lock().await;
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        debug!(delay_ms = delay.as_millis() as u64, "refresh timer armed");
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback().await;
        }));
    }

    /// Cancels the live timer. Safe when none is armed.
    pub async fn disarm(&self) {
        if let Some(timer) = self.timer.lock().await.take() {
            timer.abort();
            debug!("refresh timer disarmed");
        }
    }

    /// Whether a timer is still waiting to fire
    pub async fn is_armed(&self) -> bool {
        self.timer
            .lock()
            .await
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}
