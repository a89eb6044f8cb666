//! Local pub/sub wrapper for shadow response events.
//!
//! Publishes `accepted`/`rejected`/`delta`/`documents` on the shadow
//! topic tree. Broker failures are logged and swallowed; a response
//! event must never fail the operation that produced it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use um_channel::{BusMessage, PubSub};
use um_protocol::errors::{ErrorMessage, ShadowError};
use um_protocol::topics::{self, ResponseKind, ShadowOp};

/// Publishes shadow response events on the local bus.
pub struct ShadowPublisher {
    bus: Arc<dyn PubSub>,
    subscribed: AtomicBool,
}

impl ShadowPublisher {
    pub fn new(bus: Arc<dyn PubSub>) -> Self {
        Self {
            bus,
            subscribed: AtomicBool::new(false),
        }
    }

    pub async fn accepted(&self, thing_name: &str, shadow_name: &str, op: ShadowOp, payload: &[u8]) {
        self.publish(thing_name, shadow_name, op, ResponseKind::Accepted, payload)
            .await;
    }

    pub async fn rejected(
        &self,
        thing_name: &str,
        shadow_name: &str,
        op: ShadowOp,
        error: &ShadowError,
    ) {
        let message = ErrorMessage::from_error(error);
        self.publish(
            thing_name,
            shadow_name,
            op,
            ResponseKind::Rejected,
            &message.to_bytes(),
        )
        .await;
    }

    /// Delta events only exist for updates.
    pub async fn delta(&self, thing_name: &str, shadow_name: &str, payload: &[u8]) {
        self.publish(
            thing_name,
            shadow_name,
            ShadowOp::Update,
            ResponseKind::Delta,
            payload,
        )
        .await;
    }

    pub async fn documents(
        &self,
        thing_name: &str,
        shadow_name: &str,
        op: ShadowOp,
        payload: &[u8],
    ) {
        self.publish(thing_name, shadow_name, op, ResponseKind::Documents, payload)
            .await;
    }

    async fn publish(
        &self,
        thing_name: &str,
        shadow_name: &str,
        op: ShadowOp,
        kind: ResponseKind,
        payload: &[u8],
    ) {
        let topic = topics::response_topic(thing_name, shadow_name, op, kind);
        if let Err(e) = self.bus.publish(&topic, payload).await {
            tracing::warn!(topic = %topic, error = %e, "failed to publish shadow event");
        }
    }

    /// Register a consumer for the shadow topic tree with the broker.
    ///
    /// Call-through happens at most once no matter how often callers
    /// invoke subscribe.
    pub async fn subscribe(&self, tx: mpsc::UnboundedSender<BusMessage>) {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.bus.subscribe(topics::LOCAL_SUBSCRIPTION, tx).await {
            tracing::warn!(error = %e, "failed to subscribe to shadow topics");
            self.subscribed.store(false, Ordering::SeqCst);
        }
    }

    pub async fn unsubscribe(&self) {
        if !self.subscribed.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.bus.unsubscribe(topics::LOCAL_SUBSCRIPTION).await {
            tracing::warn!(error = %e, "failed to unsubscribe from shadow topics");
        }
    }
}
