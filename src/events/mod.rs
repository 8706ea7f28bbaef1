//! Lifecycle events delivered to registered listener endpoints, and the
//! per-tenant fan-out set that dispatches them.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::ConnectionId;

/// Failure reported by a listener endpoint; delivery continues to the
/// remaining endpoints.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Inbound payload delivered to registered listeners.
///
/// Payloads are opaque byte sequences; no message delimiting is applied.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub connection_id: ConnectionId,
    pub data: Vec<u8>,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
}

/// Notification that a connection has gone away, carrying its last-known
/// addresses and the failure cause, if any.
#[derive(Debug, Clone)]
pub struct DisconnectNotification {
    pub connection_id: ConnectionId,
    pub local: SocketAddr,
    pub remote: Option<SocketAddr>,
    pub cause: Option<Arc<io::Error>>,
}

impl DisconnectNotification {
    /// Whether the disconnect was caused by an error rather than a clean close.
    pub fn is_error(&self) -> bool {
        self.cause.is_some()
    }
}

/// Observer of a tenant's connection lifecycle.
#[async_trait]
pub trait MessageListener: Send + Sync {
    /// Fired once after the tenant's transport manager is ready for this
    /// listener; delivered asynchronously off the activation path.
    async fn initialized(&self) -> Result<(), ListenerError>;

    /// Data arrived on one of the tenant's connections.
    async fn on_message(&self, message: &InboundMessage) -> Result<(), ListenerError>;

    /// One of the tenant's connections closed.
    async fn disconnected(&self, notification: &DisconnectNotification)
        -> Result<(), ListenerError>;
}

/// Set of registered listener endpoints for one tenant.
///
/// Registration is idempotent (set semantics, keyed by endpoint identity).
/// Dispatch to an empty set logs a warning and drops the event.
pub struct ListenerSet {
    listeners: DashMap<usize, Arc<dyn MessageListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
        }
    }

    fn key(listener: &Arc<dyn MessageListener>) -> usize {
        Arc::as_ptr(listener) as *const () as usize
    }

    /// Register an endpoint; returns false if it was already present.
    pub fn add(&self, listener: Arc<dyn MessageListener>) -> bool {
        self.listeners
            .insert(Self::key(&listener), listener)
            .is_none()
    }

    /// Deregister an endpoint; returns false if it was not present.
    pub fn remove(&self, listener: &Arc<dyn MessageListener>) -> bool {
        self.listeners.remove(&Self::key(listener)).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Deliver an inbound message to every endpoint; returns the number of
    /// successful deliveries.
    pub async fn notify_message(&self, message: &InboundMessage) -> usize {
        let targets = self.targets("message received");
        let mut delivered = 0;
        for listener in targets {
            match listener.on_message(message).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    connection_id = message.connection_id,
                    error = %e,
                    "Listener endpoint failed to process inbound message"
                ),
            }
        }
        delivered
    }

    /// Deliver a disconnect notification to every endpoint; returns the
    /// number of successful deliveries.
    pub async fn notify_disconnected(&self, notification: &DisconnectNotification) -> usize {
        let targets = self.targets("disconnected");
        let mut delivered = 0;
        for listener in targets {
            match listener.disconnected(notification).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    connection_id = notification.connection_id,
                    error = %e,
                    "Listener endpoint failed to process disconnect notification"
                ),
            }
        }
        delivered
    }

    fn targets(&self, event: &str) -> Vec<Arc<dyn MessageListener>> {
        if self.listeners.is_empty() {
            tracing::warn!(event = %event, "Dropping event with no registered listeners");
            return Vec::new();
        }
        self.listeners.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        messages: AtomicUsize,
        disconnects: AtomicUsize,
        fail: bool,
    }

    impl CountingListener {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                messages: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                fail,
            })
        }
    }

    #[async_trait]
    impl MessageListener for CountingListener {
        async fn initialized(&self) -> Result<(), ListenerError> {
            Ok(())
        }

        async fn on_message(&self, _message: &InboundMessage) -> Result<(), ListenerError> {
            self.messages.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err("listener rejected the message".into());
            }
            Ok(())
        }

        async fn disconnected(
            &self,
            _notification: &DisconnectNotification,
        ) -> Result<(), ListenerError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_message() -> InboundMessage {
        InboundMessage {
            connection_id: 1,
            data: b"ping".to_vec(),
            local: "127.0.0.1:1000".parse().unwrap(),
            remote: Some("127.0.0.1:2000".parse().unwrap()),
        }
    }

    #[test]
    fn test_add_remove_idempotent() {
        let set = ListenerSet::new();
        let listener = CountingListener::new(false);
        let endpoint: Arc<dyn MessageListener> = listener.clone();

        assert!(set.add(endpoint.clone()));
        assert!(!set.add(endpoint.clone()));
        assert_eq!(set.len(), 1);

        assert!(set.remove(&endpoint));
        assert!(!set.remove(&endpoint));
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn test_notify_empty_set_drops_event() {
        let set = ListenerSet::new();
        assert_eq!(set.notify_message(&sample_message()).await, 0);
    }

    #[tokio::test]
    async fn test_failing_endpoint_does_not_abort_delivery() {
        let set = ListenerSet::new();
        let good = CountingListener::new(false);
        let bad = CountingListener::new(true);
        set.add(good.clone());
        set.add(bad.clone());

        let delivered = set.notify_message(&sample_message()).await;
        assert_eq!(delivered, 1);
        assert_eq!(good.messages.load(Ordering::SeqCst), 1);
        assert_eq!(bad.messages.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_delivery() {
        let set = ListenerSet::new();
        let listener = CountingListener::new(false);
        set.add(listener.clone());

        let notification = DisconnectNotification {
            connection_id: 3,
            local: "127.0.0.1:1000".parse().unwrap(),
            remote: None,
            cause: None,
        };
        assert!(!notification.is_error());
        assert_eq!(set.notify_disconnected(&notification).await, 1);
        assert_eq!(listener.disconnects.load(Ordering::SeqCst), 1);
    }
}
