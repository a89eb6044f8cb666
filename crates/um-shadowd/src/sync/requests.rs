//! Sync requests and the coalescing merger.

use serde_json::{Map, Value};

/// Queue key: one entry per (thing, shadow).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShadowKey {
    pub thing_name: String,
    /// Empty string for the classic shadow.
    pub shadow_name: String,
}

impl ShadowKey {
    pub fn new(thing_name: impl Into<String>, shadow_name: impl Into<String>) -> Self {
        Self {
            thing_name: thing_name.into(),
            shadow_name: shadow_name.into(),
        }
    }
}

/// What a sync request does when a worker executes it.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Push a local update patch to the cloud. `payload` is the update
    /// document (`{"state": ...}`) so null removals survive the trip.
    LocalUpdate { payload: Value, version: u64 },
    /// Propagate a local delete to the cloud.
    LocalDelete { version: u64 },
    /// Apply a full cloud document locally.
    CloudUpdate { document: Value, version: u64 },
    /// Apply a cloud delete locally.
    CloudDelete { version: u64 },
    /// Pull the full cloud document, replacing local state.
    OverwriteLocal,
    /// Push the full local document, replacing cloud state.
    OverwriteCloud,
}

/// One unit of sync work.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub key: ShadowKey,
    pub action: SyncAction,
    /// Failed execution attempts so far; drives retry backoff.
    pub attempts: u32,
}

impl SyncRequest {
    pub fn new(key: ShadowKey, action: SyncAction) -> Self {
        Self {
            key,
            action,
            attempts: 0,
        }
    }

    pub fn local_update(
        thing_name: impl Into<String>,
        shadow_name: impl Into<String>,
        payload: Value,
        version: u64,
    ) -> Self {
        Self::new(
            ShadowKey::new(thing_name, shadow_name),
            SyncAction::LocalUpdate { payload, version },
        )
    }

    pub fn local_delete(
        thing_name: impl Into<String>,
        shadow_name: impl Into<String>,
        version: u64,
    ) -> Self {
        Self::new(
            ShadowKey::new(thing_name, shadow_name),
            SyncAction::LocalDelete { version },
        )
    }

    pub fn cloud_update(
        thing_name: impl Into<String>,
        shadow_name: impl Into<String>,
        document: Value,
        version: u64,
    ) -> Self {
        Self::new(
            ShadowKey::new(thing_name, shadow_name),
            SyncAction::CloudUpdate { document, version },
        )
    }

    pub fn cloud_delete(
        thing_name: impl Into<String>,
        shadow_name: impl Into<String>,
        version: u64,
    ) -> Self {
        Self::new(
            ShadowKey::new(thing_name, shadow_name),
            SyncAction::CloudDelete { version },
        )
    }

    pub fn version(&self) -> Option<u64> {
        match &self.action {
            SyncAction::LocalUpdate { version, .. }
            | SyncAction::LocalDelete { version }
            | SyncAction::CloudUpdate { version, .. }
            | SyncAction::CloudDelete { version } => Some(*version),
            SyncAction::OverwriteLocal | SyncAction::OverwriteCloud => None,
        }
    }

    fn is_delete(&self) -> bool {
        matches!(
            self.action,
            SyncAction::LocalDelete { .. } | SyncAction::CloudDelete { .. }
        )
    }

    fn is_full(&self) -> bool {
        matches!(
            self.action,
            SyncAction::OverwriteLocal | SyncAction::OverwriteCloud
        )
    }
}

/// Combines two same-key requests into one representing their joint
/// effect. Deletes supersede updates; full overwrites supersede partial
/// updates; otherwise the newer request wins, carrying the highest
/// version seen.
pub struct RequestMerger;

impl RequestMerger {
    pub fn merge(&self, existing: SyncRequest, newer: SyncRequest) -> SyncRequest {
        debug_assert_eq!(existing.key, newer.key);
        let key = newer.key.clone();
        let attempts = existing.attempts.max(newer.attempts);
        let max_version = match (existing.version(), newer.version()) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        // Delete supersedes update, whichever order they arrived in, and
        // a full overwrite subsumes any partial update.
        let mut merged = if newer.is_delete() || newer.is_full() {
            newer
        } else if existing.is_delete() || existing.is_full() {
            existing
        } else {
            match (existing.action, newer.action) {
                // Two local patches compose.
                (
                    SyncAction::LocalUpdate { payload: older, .. },
                    SyncAction::LocalUpdate { payload: recent, .. },
                ) => SyncRequest::new(
                    key,
                    SyncAction::LocalUpdate {
                        payload: compose_patches(older, &recent),
                        version: 0,
                    },
                ),

                // Two cloud documents: the newer full document wins.
                (SyncAction::CloudUpdate { .. }, action @ SyncAction::CloudUpdate { .. }) => {
                    SyncRequest::new(key, action)
                }

                // A local patch racing a cloud document needs a full
                // reconciliation in the direction of the newer request.
                (SyncAction::LocalUpdate { .. }, SyncAction::CloudUpdate { .. }) => {
                    SyncRequest::new(key, SyncAction::OverwriteLocal)
                }
                (SyncAction::CloudUpdate { .. }, SyncAction::LocalUpdate { .. }) => {
                    SyncRequest::new(key, SyncAction::OverwriteCloud)
                }

                (_, action) => SyncRequest::new(key, action),
            }
        };

        merged.attempts = attempts;
        if let Some(version) = max_version {
            match &mut merged.action {
                SyncAction::LocalUpdate { version: v, .. }
                | SyncAction::LocalDelete { version: v }
                | SyncAction::CloudUpdate { version: v, .. }
                | SyncAction::CloudDelete { version: v } => *v = (*v).max(version),
                _ => {}
            }
        }
        merged
    }
}

/// Overlay `recent` onto `base` as update patches.
///
/// Unlike a state merge, null leaves in the newer patch are kept: they
/// still have a removal to perform when the combined patch is applied.
fn compose_patches(base: Value, recent: &Value) -> Value {
    match (base, recent) {
        (Value::Object(mut base_map), Value::Object(recent_map)) => {
            for (key, recent_value) in recent_map {
                match base_map.remove(key) {
                    Some(base_value) if recent_value.is_object() => {
                        base_map.insert(key.clone(), compose_patches(base_value, recent_value));
                    }
                    _ => {
                        base_map.insert(key.clone(), recent_value.clone());
                    }
                }
            }
            Value::Object(base_map)
        }
        (_, recent) => recent.clone(),
    }
}
