//! Cloud-side shadow access for the sync plane.
//!
//! `CloudClient` is the capability sync workers call to read and write
//! cloud shadows. `CloudDataClient` converges MQTT subscriptions to the
//! cloud response topics for the configured sync set, and
//! `classify_cloud_message` turns incoming cloud publishes into queue
//! requests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot};

use um_channel::Channel;
use um_protocol::errors::ShadowError;
use um_protocol::topics::{self, ShadowOp};

use crate::sync::requests::{ShadowKey, SyncRequest};

const GET_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Cloud shadow operations consumed by sync workers.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Fetch the full cloud document; `None` when the cloud shadow does
    /// not exist.
    async fn get_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
    ) -> Result<Option<Value>, ShadowError>;

    /// Send an update document. Returns the resulting cloud version when
    /// the transport reports one.
    async fn update_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> Result<Option<u64>, ShadowError>;

    async fn delete_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> Result<(), ShadowError>;
}

/// `CloudClient` over the cloud MQTT session.
///
/// Updates and deletes are published at-least-once and acknowledged
/// asynchronously through the documents topics; gets wait for the
/// `get/accepted` or `get/rejected` response. The owner of the MQTT
/// event loop must feed incoming publishes to [`Self::handle_response`].
pub struct MqttCloudClient {
    channel: Arc<dyn Channel>,
    pending_gets: Mutex<HashMap<String, oneshot::Sender<Result<Option<Value>, ShadowError>>>>,
}

impl MqttCloudClient {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            pending_gets: Mutex::new(HashMap::new()),
        }
    }

    /// Feed a cloud publish back into a waiting `get_shadow` call.
    /// Returns true when the message was consumed.
    pub async fn handle_response(&self, topic: &str, payload: &[u8]) -> bool {
        let (request_topic, outcome) = if let Some(prefix) = topic.strip_suffix("/accepted") {
            let document = serde_json::from_slice::<Value>(payload)
                .map(Some)
                .map_err(|e| ShadowError::Service(format!("bad cloud get response: {e}")));
            (prefix, document)
        } else if let Some(prefix) = topic.strip_suffix("/rejected") {
            let code = serde_json::from_slice::<Value>(payload)
                .ok()
                .and_then(|v| v.get("code").and_then(Value::as_u64));
            let outcome = match code {
                Some(404) => Ok(None),
                other => Err(ShadowError::Service(format!(
                    "cloud rejected get with code {other:?}"
                ))),
            };
            (prefix, outcome)
        } else {
            return false;
        };

        let Some(tx) = self.pending_gets.lock().await.remove(request_topic) else {
            return false;
        };
        let _ = tx.send(outcome);
        true
    }
}

#[async_trait]
impl CloudClient for MqttCloudClient {
    async fn get_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
    ) -> Result<Option<Value>, ShadowError> {
        let topic = topics::op_topic(thing_name, shadow_name, ShadowOp::Get);
        for suffix in ["accepted", "rejected"] {
            self.channel
                .subscribe(&format!("{topic}/{suffix}"), QoS::AtLeastOnce)
                .await
                .map_err(|e| ShadowError::Service(e.to_string()))?;
        }

        let (tx, rx) = oneshot::channel();
        self.pending_gets.lock().await.insert(topic.clone(), tx);

        if let Err(e) = self.channel.publish(&topic, b"", QoS::AtLeastOnce).await {
            self.pending_gets.lock().await.remove(&topic);
            return Err(ShadowError::Service(e.to_string()));
        }

        match tokio::time::timeout(GET_RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ShadowError::Service("cloud get response dropped".into())),
            Err(_) => {
                self.pending_gets.lock().await.remove(&topic);
                Err(ShadowError::Service("timed out waiting for cloud shadow".into()))
            }
        }
    }

    async fn update_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> Result<Option<u64>, ShadowError> {
        let topic = topics::op_topic(thing_name, shadow_name, ShadowOp::Update);
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| ShadowError::Service(e.to_string()))?;
        self.channel
            .publish(&topic, &bytes, QoS::AtLeastOnce)
            .await
            .map_err(|e| ShadowError::Service(e.to_string()))?;
        // The accepted version arrives later on the documents topic.
        Ok(None)
    }

    async fn delete_shadow(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: &Value,
    ) -> Result<(), ShadowError> {
        let topic = topics::op_topic(thing_name, shadow_name, ShadowOp::Delete);
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| ShadowError::Service(e.to_string()))?;
        self.channel
            .publish(&topic, &bytes, QoS::AtLeastOnce)
            .await
            .map_err(|e| ShadowError::Service(e.to_string()))
    }
}

/// Stand-in for deployments without a cloud session. Sync workers never
/// run in that case, but the wiring still needs a client.
pub struct UnconfiguredCloudClient;

#[async_trait]
impl CloudClient for UnconfiguredCloudClient {
    async fn get_shadow(&self, _: &str, _: &str) -> Result<Option<Value>, ShadowError> {
        Err(ShadowError::Service("cloud session not configured".into()))
    }

    async fn update_shadow(&self, _: &str, _: &str, _: &Value) -> Result<Option<u64>, ShadowError> {
        Err(ShadowError::Service("cloud session not configured".into()))
    }

    async fn delete_shadow(&self, _: &str, _: &str, _: &Value) -> Result<(), ShadowError> {
        Err(ShadowError::Service("cloud session not configured".into()))
    }
}

/// Manages cloud subscriptions for the configured sync set.
pub struct CloudDataClient {
    channel: Arc<dyn Channel>,
    subscribed: Mutex<HashSet<String>>,
}

impl CloudDataClient {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    fn topics_for(key: &ShadowKey) -> [String; 3] {
        [
            topics::cloud_delta_topic(&key.thing_name, &key.shadow_name),
            topics::cloud_documents_topic(&key.thing_name, &key.shadow_name),
            topics::cloud_delete_accepted_topic(&key.thing_name, &key.shadow_name),
        ]
    }

    /// Converge subscriptions to the given sync set. Failed operations
    /// leave the tracked state untouched so the next call retries them.
    pub async fn update_subscriptions(&self, sync_set: &HashSet<ShadowKey>) {
        let desired: HashSet<String> = sync_set.iter().flat_map(|k| Self::topics_for(k)).collect();
        let mut current = self.subscribed.lock().await;

        let stale: Vec<String> = current.difference(&desired).cloned().collect();
        for topic in stale {
            match self.channel.unsubscribe(&topic).await {
                Ok(()) => {
                    current.remove(&topic);
                }
                Err(e) => tracing::warn!(topic = %topic, error = %e, "cloud unsubscribe failed"),
            }
        }

        let missing: Vec<String> = desired.difference(&current).cloned().collect();
        for topic in missing {
            match self.channel.subscribe(&topic, QoS::AtLeastOnce).await {
                Ok(()) => {
                    current.insert(topic);
                }
                Err(e) => tracing::warn!(topic = %topic, error = %e, "cloud subscribe failed"),
            }
        }
    }

    /// Drop every tracked subscription.
    pub async fn stop_subscribing(&self) {
        let mut current = self.subscribed.lock().await;
        for topic in current.drain() {
            if let Err(e) = self.channel.unsubscribe(&topic).await {
                tracing::warn!(topic = %topic, error = %e, "cloud unsubscribe failed");
            }
        }
    }
}

enum CloudEvent {
    Delta,
    Documents,
    DeleteAccepted,
}

fn parse_cloud_topic(topic: &str) -> Option<(String, String, CloudEvent)> {
    let parts: Vec<&str> = topic.split('/').collect();
    let (thing, rest) = match parts.as_slice() {
        ["$aws", "things", thing, "shadow", rest @ ..] => (*thing, rest),
        _ => return None,
    };
    let (shadow, rest) = match rest {
        ["name", shadow, rest @ ..] => (*shadow, rest),
        rest => ("", rest),
    };
    let event = match rest {
        ["update", "delta"] => CloudEvent::Delta,
        ["update", "documents"] => CloudEvent::Documents,
        ["delete", "accepted"] => CloudEvent::DeleteAccepted,
        _ => return None,
    };
    Some((thing.to_string(), shadow.to_string(), event))
}

/// Turn an incoming cloud publish into a sync request.
///
/// Full state travels on the documents topic; delta notifications are
/// subscribed for liveness but carry no work of their own.
pub fn classify_cloud_message(topic: &str, payload: &[u8]) -> Option<SyncRequest> {
    let (thing_name, shadow_name, event) = parse_cloud_topic(topic)?;
    match event {
        CloudEvent::Delta => None,
        CloudEvent::Documents => {
            let value: Value = serde_json::from_slice(payload).ok()?;
            let current = value.get("current")?.clone();
            let version = current.get("version").and_then(Value::as_u64)?;
            Some(SyncRequest::cloud_update(
                thing_name,
                shadow_name,
                current,
                version,
            ))
        }
        CloudEvent::DeleteAccepted => {
            let version = serde_json::from_slice::<Value>(payload)
                .ok()
                .and_then(|v| v.get("version").and_then(Value::as_u64))
                .unwrap_or(0);
            Some(SyncRequest::cloud_delete(thing_name, shadow_name, version))
        }
    }
}
