// Host environment abstraction
// The SDK runs either as a top-level application or embedded inside a parent
// container that can push credentials and balance updates over a message
// channel. Everything the SDK needs from that environment sits behind
// HostContext so sessions are testable without a real container.

use tokio::sync::broadcast;
use tracing::debug;

use crate::models::messages::ChildMessage;

/// A message delivered by the parent container, with the origin it came from
#[derive(Debug, Clone)]
pub struct HostEnvelope {
    pub origin: String,
    pub payload: serde_json::Value,
}

/// A message the SDK posted upward, with the origin it targeted
#[derive(Debug, Clone, PartialEq)]
pub struct PostedMessage {
    pub message: ChildMessage,
    pub target_origin: String,
}

/// Capabilities of the embedding environment
pub trait HostContext: Send + Sync {
    /// Whether a parent container exists above this session
    fn is_nested(&self) -> bool;

    /// Posts a message to the parent. Delivery is fire-and-forget; a
    /// detached session drops the message.
    fn post_to_parent(&self, message: ChildMessage, target_origin: &str);

    /// Listens for parent messages. Dropping the subscription removes
    /// the listener.
    fn subscribe(&self) -> MessageSubscription;
}

/// Receiver half of the parent message channel
pub struct MessageSubscription {
    rx: broadcast::Receiver<HostEnvelope>,
}

impl MessageSubscription {
    /// Next message from the parent, or None once the channel closes.
    /// Lagged gaps are skipped, not surfaced.
    pub async fn recv(&mut self) -> Option<HostEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "parent message subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Host for top-level sessions where no parent exists
#[derive(Debug, Clone, Default)]
pub struct DetachedHost;

impl HostContext for DetachedHost {
    fn is_nested(&self) -> bool {
        false
    }

    fn post_to_parent(&self, message: ChildMessage, _target_origin: &str) {
        debug!(?message, "no parent container, message dropped");
    }

    fn subscribe(&self) -> MessageSubscription {
        // No sender exists, so the subscription reports closed immediately
        let (_tx, rx) = broadcast::channel(1);
        MessageSubscription { rx }
    }
}

/// Host backed by in-process channels. Embedders bridge these to their real
/// container boundary; tests drive them directly.
pub struct ChannelHost {
    to_parent: broadcast::Sender<PostedMessage>,
    from_parent: broadcast::Sender<HostEnvelope>,
}

impl ChannelHost {
    pub fn new() -> Self {
        let (to_parent, _) = broadcast::channel(32);
        let (from_parent, _) = broadcast::channel(32);
        Self {
            to_parent,
            from_parent,
        }
    }

    /// Parent-side view of everything the SDK posts
    pub fn posted(&self) -> broadcast::Receiver<PostedMessage> {
        self.to_parent.subscribe()
    }

    /// Delivers a raw payload to the SDK as if the parent had posted it
    pub fn deliver(&self, origin: impl Into<String>, payload: serde_json::Value) {
        let envelope = HostEnvelope {
            origin: origin.into(),
            payload,
        };
        if self.from_parent.send(envelope).is_err() {
            debug!("no active subscription, parent message dropped");
        }
    }
}

impl Default for ChannelHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostContext for ChannelHost {
    fn is_nested(&self) -> bool {
        true
    }

    fn post_to_parent(&self, message: ChildMessage, target_origin: &str) {
        let posted = PostedMessage {
            message,
            target_origin: target_origin.to_string(),
        };
        if self.to_parent.send(posted).is_err() {
            debug!("parent not listening, message dropped");
        }
    }

    fn subscribe(&self) -> MessageSubscription {
        MessageSubscription {
            rx: self.from_parent.subscribe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_detached_host_subscription_closes_immediately() {
        let host = DetachedHost;
        assert!(!host.is_nested());

        let mut sub = host.subscribe();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_host_delivers_parent_messages() {
        let host = ChannelHost::new();
        assert!(host.is_nested());

        let mut sub = host.subscribe();
        host.deliver("https://billing.example.com", json!({"type": "PING"}));

        let envelope = sub.recv().await.unwrap();
        assert_eq!(envelope.origin, "https://billing.example.com");
        assert_eq!(envelope.payload["type"], "PING");
    }

    #[tokio::test]
    async fn test_channel_host_records_posted_messages() {
        let host = ChannelHost::new();
        let mut posted = host.posted();

        host.post_to_parent(ChildMessage::request_credentials(), "*");

        let seen = posted.recv().await.unwrap();
        assert_eq!(seen.target_origin, "*");
        assert_eq!(seen.message, ChildMessage::request_credentials());
    }

    #[tokio::test]
    async fn test_channel_host_posting_without_listener_is_harmless() {
        let host = ChannelHost::new();
        host.post_to_parent(ChildMessage::BalanceUpdate { balance: 5 }, "*");
    }

    #[tokio::test]
    async fn test_dropped_subscription_stops_receiving() {
        let host = ChannelHost::new();
        let sub = host.subscribe();
        drop(sub);

        // Nothing to assert beyond "this does not panic": the broadcast
        // sender simply has no receivers again
        host.deliver("*", json!({"type": "PING"}));
    }
}
