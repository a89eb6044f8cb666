//! Mock cloud channel for testing without a real broker.
//!
//! Records publishes, subscriptions, and unsubscriptions for assertion
//! in tests.

use async_trait::async_trait;
use rumqttc::QoS;
use std::sync::Mutex;

use crate::channel::Channel;
use crate::error::MqttResult;

/// A recorded publish call.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Mock implementation of the `Channel` trait.
///
/// Thread-safe via `Mutex` (fine for test contexts).
pub struct MockChannel {
    published: Mutex<Vec<PublishedMessage>>,
    active: Mutex<Vec<String>>,
    unsubscribe_log: Mutex<Vec<String>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            active: Mutex::new(Vec::new()),
            unsubscribe_log: Mutex::new(Vec::new()),
        }
    }

    /// Get all published messages.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Get published messages for a specific topic.
    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Filters with a live subscription, in subscription order.
    pub fn active_subscriptions(&self) -> Vec<String> {
        self.active.lock().unwrap().clone()
    }

    pub fn is_subscribed_to(&self, filter: &str) -> bool {
        self.active.lock().unwrap().iter().any(|f| f == filter)
    }

    /// Every unsubscribe call seen, in order.
    pub fn unsubscriptions(&self) -> Vec<String> {
        self.unsubscribe_log.lock().unwrap().clone()
    }

    /// Clear all recorded state.
    pub fn reset(&self) {
        self.published.lock().unwrap().clear();
        self.active.lock().unwrap().clear();
        self.unsubscribe_log.lock().unwrap().clear();
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
        });
        Ok(())
    }

    async fn subscribe(&self, filter: &str, _qos: QoS) -> MqttResult<()> {
        let mut active = self.active.lock().unwrap();
        if !active.iter().any(|f| f == filter) {
            active.push(filter.to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        self.active.lock().unwrap().retain(|f| f != filter);
        self.unsubscribe_log
            .lock()
            .unwrap()
            .push(filter.to_string());
        Ok(())
    }
}
