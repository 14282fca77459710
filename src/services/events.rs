//! Server-Sent Event fan-out
//!
//! Each subscriber owns a bounded queue; a full queue drops the event for
//! that subscriber instead of blocking the sender.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BrokerEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    pub data: Value,
}

#[derive(Default)]
pub struct EventBroker {
    subscribers: RwLock<HashMap<String, mpsc::Sender<BrokerEvent>>>,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Re-subscribing under the same id replaces the
    /// previous queue.
    pub async fn subscribe(&self, client_id: &str) -> mpsc::Receiver<BrokerEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        self.subscribers
            .write()
            .await
            .insert(client_id.to_string(), tx);
        debug!(client_id = %client_id, "sse subscriber registered");
        rx
    }

    pub async fn unsubscribe(&self, client_id: &str) -> bool {
        let removed = self.subscribers.write().await.remove(client_id).is_some();
        if removed {
            debug!(client_id = %client_id, "sse subscriber removed");
        }
        removed
    }

    /// Deliver one event to one subscriber. Returns false if the subscriber
    /// is unknown, gone, or its queue is full.
    pub async fn send(&self, client_id: &str, data: Value, event: Option<&str>) -> bool {
        let subscribers = self.subscribers.read().await;
        let Some(tx) = subscribers.get(client_id) else {
            return false;
        };

        let payload = BrokerEvent {
            event: event.map(ToOwned::to_owned),
            data,
        };
        match tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %client_id, "subscriber queue full; event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Deliver one event to every subscriber not listed in `exclude`.
    /// Returns the number of successful deliveries.
    pub async fn broadcast(&self, data: &Value, event: Option<&str>, exclude: &[&str]) -> usize {
        let targets: Vec<String> = {
            let subscribers = self.subscribers.read().await;
            subscribers
                .keys()
                .filter(|id| !exclude.contains(&id.as_str()))
                .cloned()
                .collect()
        };

        let mut delivered = 0;
        for client_id in targets {
            if self.send(&client_id, data.clone(), event).await {
                delivered += 1;
            }
        }
        delivered
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_sent_events() {
        let broker = EventBroker::new();
        let mut rx = broker.subscribe("client-1").await;

        assert!(broker.send("client-1", json!({ "n": 1 }), Some("tick")).await);

        let event = rx.recv().await.expect("event delivered");
        assert_eq!(event.event.as_deref(), Some("tick"));
        assert_eq!(event.data, json!({ "n": 1 }));
    }

    #[tokio::test]
    async fn sending_to_unknown_client_reports_false() {
        let broker = EventBroker::new();
        assert!(!broker.send("ghost", json!({}), None).await);
    }

    #[tokio::test]
    async fn unsubscribed_client_stops_receiving() {
        let broker = EventBroker::new();
        let _rx = broker.subscribe("client-1").await;

        assert!(broker.unsubscribe("client-1").await);
        assert!(!broker.send("client-1", json!({}), None).await);
        assert_eq!(broker.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let broker = EventBroker::new();
        let _rx = broker.subscribe("slow").await;

        for _ in 0..SUBSCRIBER_QUEUE_DEPTH {
            assert!(broker.send("slow", json!({}), None).await);
        }
        assert!(!broker.send("slow", json!({}), None).await);
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_subscribers() {
        let broker = EventBroker::new();
        let mut rx_a = broker.subscribe("a").await;
        let mut rx_b = broker.subscribe("b").await;

        let delivered = broker.broadcast(&json!({ "x": 1 }), None, &["b"]).await;
        assert_eq!(delivered, 1);

        assert_eq!(rx_a.recv().await.expect("delivered").data, json!({ "x": 1 }));
        assert!(rx_b.try_recv().is_err());
    }
}
