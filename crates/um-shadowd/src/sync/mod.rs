//! Bidirectional cloud sync plane.
//!
//! Local writes and incoming cloud events become [`requests::SyncRequest`]s
//! in a coalescing [`queue::RequestQueue`]; [`workers`] drain the queue
//! and apply each request in the permitted [`direction`].

pub mod cloud;
pub mod direction;
pub mod mock;
pub mod queue;
pub mod requests;
pub mod workers;

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::sync::direction::DirectionWrapper;
use crate::sync::queue::RequestQueue;
use crate::sync::requests::{ShadowKey, SyncRequest};

/// Decides which local writes enter the sync queue.
///
/// A write is enqueued only when its shadow is in the configured sync
/// set and the active direction permits that arrow. Cloud events pass
/// through the same gate in the other direction.
pub struct SyncGate {
    set: RwLock<HashSet<ShadowKey>>,
    pub direction: DirectionWrapper,
    pub queue: Arc<RequestQueue>,
}

impl SyncGate {
    pub fn new(queue: Arc<RequestQueue>, direction: DirectionWrapper) -> Self {
        Self {
            set: RwLock::new(HashSet::new()),
            direction,
            queue,
        }
    }

    pub fn set_sync_set(&self, set: HashSet<ShadowKey>) {
        *self.set.write().unwrap() = set;
    }

    pub fn sync_set(&self) -> HashSet<ShadowKey> {
        self.set.read().unwrap().clone()
    }

    pub fn contains(&self, thing_name: &str, shadow_name: &str) -> bool {
        self.set
            .read()
            .unwrap()
            .contains(&ShadowKey::new(thing_name, shadow_name))
    }

    pub async fn notify_local_update(
        &self,
        thing_name: &str,
        shadow_name: &str,
        payload: Value,
        version: u64,
    ) {
        if !self.contains(thing_name, shadow_name) || !self.direction.allows_device_to_cloud() {
            return;
        }
        self.offer(SyncRequest::local_update(
            thing_name,
            shadow_name,
            payload,
            version,
        ))
        .await;
    }

    pub async fn notify_local_delete(&self, thing_name: &str, shadow_name: &str, version: u64) {
        if !self.contains(thing_name, shadow_name) || !self.direction.allows_device_to_cloud() {
            return;
        }
        self.offer(SyncRequest::local_delete(thing_name, shadow_name, version))
            .await;
    }

    /// Enqueue a cloud-originated request, dropping it when the shadow is
    /// not synchronized or the direction forbids cloud-to-device flow.
    pub async fn enqueue_cloud(&self, request: SyncRequest) {
        if !self.contains(&request.key.thing_name, &request.key.shadow_name)
            || !self.direction.allows_cloud_to_device()
        {
            return;
        }
        self.offer(request).await;
    }

    async fn offer(&self, request: SyncRequest) {
        let key = request.key.clone();
        if !self.queue.offer(request).await {
            tracing::warn!(
                thing = %key.thing_name,
                shadow = %key.shadow_name,
                "sync queue full, dropping request"
            );
        }
    }
}
