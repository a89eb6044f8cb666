//! Shared test harness for the E2E integration tests.
//!
//! Wires a real `ShadowManager` over an in-memory store, the in-process
//! `LocalBus`, a `MockChannel` cloud session, and a `MockCloudClient`,
//! exercising real code paths across all crate boundaries.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;

use um_channel::{BusMessage, LocalBus, MockChannel};
use um_protocol::errors::ShadowError;
use um_protocol::ipc::{
    DeleteThingShadowRequest, GetThingShadowRequest, ListNamedShadowsForThingRequest,
    ListNamedShadowsForThingResponse, UpdateThingShadowRequest,
};
use um_shadowd::auth::{AllowAll, Authorizer};
use um_shadowd::orchestrator::{Dependencies, ShadowManager};
use um_shadowd::ratelimit::RateLimiter;
use um_shadowd::sync::mock::MockCloudClient;
use um_shadowd::sync::workers::SyncContext;

pub const DEFAULT_CONFIG: &str = r#"
thing_name = "gw-01"

[store]
db_path = ":memory:"
"#;

/// Config with the gateway's classic and "config" shadows synchronized.
pub const SYNCED_CONFIG: &str = r#"
thing_name = "gw-01"

[store]
db_path = ":memory:"

[synchronize.core_thing]
classic_shadow = true
named_shadows = ["config"]
"#;

pub struct TestHarness {
    pub bus: Arc<LocalBus>,
    pub cloud_channel: Arc<MockChannel>,
    pub cloud: Arc<MockCloudClient>,
    pub manager: Arc<ShadowManager>,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_config(DEFAULT_CONFIG, Arc::new(AllowAll)).await
    }

    pub async fn synced() -> Self {
        Self::with_config(SYNCED_CONFIG, Arc::new(AllowAll)).await
    }

    pub async fn with_config(toml: &str, authorizer: Arc<dyn Authorizer>) -> Self {
        let config = um_shadowd::config::ServiceConfig::from_toml(toml).expect("valid config");
        let bus = Arc::new(LocalBus::new());
        let cloud_channel = Arc::new(MockChannel::new());
        let cloud = Arc::new(MockCloudClient::new());

        let manager = ShadowManager::install(
            config,
            Dependencies {
                bus: bus.clone(),
                cloud_channel: cloud_channel.clone(),
                cloud_client: cloud.clone(),
                authorizer,
            },
        )
        .await
        .expect("install");
        manager.post_inject().await;
        manager.startup().await.expect("startup");

        Self {
            bus,
            cloud_channel,
            cloud,
            manager,
        }
    }

    /// Subscribe to every shadow event on the bus. Call before acting.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<BusMessage> {
        self.bus.subscribe_channel("$aws/things/+/shadow/#")
    }

    /// A sync context matching the manager's wiring, for driving
    /// individual sync requests from tests.
    pub fn sync_context(&self) -> Arc<SyncContext> {
        let ctx = self.manager.handler_context();
        Arc::new(SyncContext {
            pool: ctx.pool.clone(),
            handlers: ctx.clone(),
            cloud: self.cloud.clone(),
            outbound: Arc::new(RateLimiter::new(0, 0)),
        })
    }

    pub async fn update(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: Value,
    ) -> Result<Value, ShadowError> {
        let response = self
            .manager
            .operations()
            .update_thing_shadow(UpdateThingShadowRequest {
                thing_name: thing_name.into(),
                shadow_name: shadow_name.into(),
                payload: serde_json::to_vec(&payload).unwrap(),
            })
            .await?;
        Ok(serde_json::from_slice(&response.payload).unwrap())
    }

    pub async fn get(&self, thing_name: &str, shadow_name: &str) -> Result<Value, ShadowError> {
        let response = self
            .manager
            .operations()
            .get_thing_shadow(GetThingShadowRequest {
                thing_name: thing_name.into(),
                shadow_name: shadow_name.into(),
            })
            .await?;
        Ok(serde_json::from_slice(&response.payload).unwrap())
    }

    pub async fn delete(&self, thing_name: &str, shadow_name: &str) -> Result<Value, ShadowError> {
        let response = self
            .manager
            .operations()
            .delete_thing_shadow(DeleteThingShadowRequest {
                thing_name: thing_name.into(),
                shadow_name: shadow_name.into(),
            })
            .await?;
        Ok(serde_json::from_slice(&response.payload).unwrap())
    }

    pub async fn list(
        &self,
        thing_name: &str,
        next_token: Option<String>,
        page_size: Option<u32>,
    ) -> Result<ListNamedShadowsForThingResponse, ShadowError> {
        self.manager
            .operations()
            .list_named_shadows_for_thing(ListNamedShadowsForThingRequest {
                thing_name: thing_name.into(),
                next_token,
                page_size,
            })
            .await
    }
}

/// Receive the next bus message on `topic`, skipping others, within a
/// short deadline.
pub async fn expect_event(
    rx: &mut mpsc::UnboundedReceiver<BusMessage>,
    topic: &str,
) -> BusMessage {
    let deadline = Duration::from_secs(2);
    tokio::time::timeout(deadline, async {
        loop {
            let message = rx.recv().await.expect("bus closed");
            if message.topic == topic {
                return message;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no event on {topic} within {deadline:?}"))
}

/// Assert that no message for `topic` is already queued.
pub fn assert_no_event(rx: &mut mpsc::UnboundedReceiver<BusMessage>, topic: &str) {
    while let Ok(message) = rx.try_recv() {
        assert_ne!(message.topic, topic, "unexpected event on {topic}");
    }
}
