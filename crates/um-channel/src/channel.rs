//! Cloud MQTT channel.
//!
//! Wraps `rumqttc::AsyncClient` behind the `Channel` trait so the sync
//! plane can publish shadow requests and manage subscriptions without
//! knowing about the broker, and tests can substitute a mock.

use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use crate::config::MqttConfig;
use crate::error::{MqttError, MqttResult};
use crate::tls;

/// Abstraction over the cloud MQTT session.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Publish a raw payload to a topic.
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()>;

    /// Subscribe to a topic filter.
    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()>;

    /// Drop a subscription.
    async fn unsubscribe(&self, filter: &str) -> MqttResult<()>;
}

/// MQTT channel connected to the cloud shadow service.
///
/// Owns the `AsyncClient`. The `EventLoop` is returned separately from
/// the constructors; the caller must drive it in a spawned task via
/// `eventloop.poll()` and feed incoming publishes back to the service.
pub struct MqttChannel {
    client: AsyncClient,
}

impl MqttChannel {
    /// Create a channel from configuration, with TLS when enabled.
    pub fn new(config: &MqttConfig) -> MqttResult<(Self, EventLoop)> {
        let mut options =
            MqttOptions::new(&config.client_id, &config.broker_host, config.broker_port);
        options.set_keep_alive(std::time::Duration::from_secs(config.keepalive_secs.into()));

        if config.use_tls {
            options.set_transport(tls::load_tls_transport(config)?);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        Ok((Self { client }, eventloop))
    }

    /// Create a channel for local development (no TLS).
    pub fn new_plaintext(host: &str, port: u16, client_id: &str) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(std::time::Duration::from_secs(30));

        let (client, eventloop) = AsyncClient::new(options, 64);
        (Self { client }, eventloop)
    }
}

#[async_trait]
impl Channel for MqttChannel {
    async fn publish(&self, topic: &str, payload: &[u8], qos: QoS) -> MqttResult<()> {
        self.client
            .publish(topic, qos, false, payload)
            .await
            .map_err(|e| MqttError::Publish(e.to_string()))
    }

    async fn subscribe(&self, filter: &str, qos: QoS) -> MqttResult<()> {
        self.client
            .subscribe(filter, qos)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))
    }

    async fn unsubscribe(&self, filter: &str) -> MqttResult<()> {
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| MqttError::Unsubscribe(e.to_string()))
    }
}
