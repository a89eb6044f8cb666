//! In-process local pub/sub bus.
//!
//! The shadow manager serves local clients over a broker owned by the
//! host runtime; this module defines the `PubSub` interface the service
//! consumes and an in-process implementation used for wiring and tests.
//! Delivery is fan-out to every subscription whose MQTT-style filter
//! (`+` and `#` wildcards) matches the published topic.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::MqttResult;

/// A message delivered to a local subscriber.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Local broker interface consumed by the shadow service.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> MqttResult<()>;

    /// Register a subscription; matching messages are sent to `tx`.
    async fn subscribe(
        &self,
        filter: &str,
        tx: mpsc::UnboundedSender<BusMessage>,
    ) -> MqttResult<()>;

    /// Remove every subscription registered under `filter`.
    async fn unsubscribe(&self, filter: &str) -> MqttResult<()>;
}

struct BusSubscription {
    filter: String,
    tx: mpsc::UnboundedSender<BusMessage>,
}

/// In-process `PubSub` implementation.
pub struct LocalBus {
    subscriptions: Mutex<Vec<BusSubscription>>,
    published: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }

    /// Convenience: subscribe and get the receiving half back.
    pub fn subscribe_channel(&self, filter: &str) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscriptions.lock().unwrap().push(BusSubscription {
            filter: filter.to_string(),
            tx,
        });
        rx
    }

    /// Total messages published through this bus.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for LocalBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> MqttResult<()> {
        tracing::trace!(topic = %topic, bytes = payload.len(), "bus publish");
        self.published.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscriptions.lock().unwrap();
        // Drop subscriptions whose receiver has gone away.
        subs.retain(|sub| {
            if !topic_matches(&sub.filter, topic) {
                return true;
            }
            sub.tx
                .send(BusMessage {
                    topic: topic.to_string(),
                    payload: payload.to_vec(),
                })
                .is_ok()
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
        tx: mpsc::UnboundedSender<BusMessage>,
    ) -> MqttResult<()> {
        self.subscriptions.lock().unwrap().push(BusSubscription {
            filter: filter.to_string(),
            tx,
        });
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|sub| sub.filter != filter);
        Ok(())
    }
}

/// MQTT-style topic filter matching with `+` (one level) and `#` (rest).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
