//! Shadow document merge and delta algebra.
//!
//! A merge applies an update payload to an existing document: null leaves
//! remove, scalars and arrays replace, objects recurse. Metadata leaves
//! touched by the update are stamped with the merge time; untouched leaves
//! keep their previous timestamps. The delta is the structural diff of
//! `desired` against `reported`, with order-sensitive array comparison.

use serde_json::{Map, Value, json};

use crate::document::{ShadowDocument, ShadowState};
use crate::errors::ShadowError;
use crate::validator::UpdatePayload;

/// Result of merging an update into a stored document.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub document: ShadowDocument,
    /// Non-empty structural diff of desired against reported.
    pub delta: Option<Value>,
    /// The pre-merge document, for the `documents` event.
    pub previous: Option<ShadowDocument>,
}

/// Merge `update` into `existing`, producing the next document version.
///
/// Fails with a version conflict when the update pins a version that does
/// not match the stored one.
pub fn merge_document(
    existing: Option<&ShadowDocument>,
    update: &UpdatePayload,
    now: i64,
) -> Result<MergeOutcome, ShadowError> {
    if let (Some(requested), Some(prev)) = (update.version, existing) {
        if requested != prev.version {
            return Err(ShadowError::version_conflict());
        }
    }

    let prev_state = existing.map(|doc| doc.state.clone()).unwrap_or_default();
    let prev_meta = existing.map(|doc| &doc.metadata);

    let (desired, desired_meta) = merge_section(
        prev_state.desired,
        prev_meta.and_then(|m| m.get("desired")).cloned(),
        update.desired.as_ref(),
        now,
    );
    let (reported, reported_meta) = merge_section(
        prev_state.reported,
        prev_meta.and_then(|m| m.get("reported")).cloned(),
        update.reported.as_ref(),
        now,
    );

    let mut metadata = Map::new();
    if let Some(meta) = desired_meta {
        metadata.insert("desired".into(), meta);
    }
    if let Some(meta) = reported_meta {
        metadata.insert("reported".into(), meta);
    }

    let document = ShadowDocument {
        state: ShadowState { desired, reported },
        metadata: Value::Object(metadata),
        version: existing.map(|doc| doc.version + 1).unwrap_or(1),
    };

    Ok(MergeOutcome {
        delta: document.delta(),
        previous: existing.cloned(),
        document,
    })
}

/// Merge one of the `desired`/`reported` sections with its metadata.
fn merge_section(
    prev: Option<Value>,
    prev_meta: Option<Value>,
    patch: Option<&Value>,
    now: i64,
) -> (Option<Value>, Option<Value>) {
    match patch {
        // Section absent from the update: untouched.
        None => (prev, prev_meta),
        // Explicit null clears the whole section.
        Some(Value::Null) => (None, None),
        Some(patch) => (merge_values(prev, patch), stamp_metadata(prev_meta, patch, now)),
    }
}

/// Deep-merge a patch into a base value.
///
/// Null leaves in the patch remove the corresponding base key; objects
/// recurse; scalars and arrays replace whatever was there.
pub fn merge_values(base: Option<Value>, patch: &Value) -> Option<Value> {
    match patch {
        Value::Null => None,
        Value::Object(patch_map) => {
            let mut out = match base {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            for (key, patch_value) in patch_map {
                match patch_value {
                    Value::Null => {
                        out.remove(key);
                    }
                    Value::Object(_) => {
                        if let Some(merged) = merge_values(out.remove(key), patch_value) {
                            out.insert(key.clone(), merged);
                        }
                    }
                    other => {
                        out.insert(key.clone(), other.clone());
                    }
                }
            }
            Some(Value::Object(out))
        }
        other => Some(other.clone()),
    }
}

/// Update a metadata subtree along the shape of a patch.
///
/// Every leaf the patch touches gets `{"timestamp": now}`; removed leaves
/// lose their metadata; untouched leaves keep their previous stamps.
fn stamp_metadata(prev: Option<Value>, patch: &Value, now: i64) -> Option<Value> {
    match patch {
        Value::Null => None,
        Value::Object(patch_map) => {
            let mut out = match prev {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            for (key, patch_value) in patch_map {
                match patch_value {
                    Value::Null => {
                        out.remove(key);
                    }
                    Value::Object(_) => {
                        if let Some(meta) = stamp_metadata(out.remove(key), patch_value, now) {
                            out.insert(key.clone(), meta);
                        }
                    }
                    _ => {
                        out.insert(key.clone(), json!({"timestamp": now}));
                    }
                }
            }
            Some(Value::Object(out))
        }
        _ => Some(json!({"timestamp": now})),
    }
}

/// Structural diff of `desired` against `reported`.
///
/// Leaves missing from `reported` are included; equal leaves (arrays
/// compared element-wise, order-sensitive) are excluded. Returns `None`
/// when the diff is empty.
pub fn delta_state(desired: &Value, reported: &Value) -> Option<Value> {
    let desired_map = match desired {
        Value::Object(map) => map,
        _ => {
            return if desired == reported {
                None
            } else {
                Some(desired.clone())
            };
        }
    };
    let empty = Map::new();
    let reported_map = match reported {
        Value::Object(map) => map,
        _ => &empty,
    };

    let mut out = Map::new();
    for (key, desired_value) in desired_map {
        match reported_map.get(key) {
            None => {
                out.insert(key.clone(), desired_value.clone());
            }
            Some(reported_value) => {
                if let Some(diff) = delta_value(desired_value, reported_value) {
                    out.insert(key.clone(), diff);
                }
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(Value::Object(out))
    }
}

fn delta_value(desired: &Value, reported: &Value) -> Option<Value> {
    match (desired, reported) {
        (Value::Object(_), Value::Object(_)) => delta_state(desired, reported),
        _ => {
            if desired == reported {
                None
            } else {
                Some(desired.clone())
            }
        }
    }
}

/// Project a metadata tree onto the shape of another value, keeping only
/// the branches present in `shape`. Used to attach metadata to deltas.
pub fn project_metadata(meta: &Value, shape: &Value) -> Value {
    match shape {
        Value::Object(shape_map) => {
            let mut out = Map::new();
            if let Value::Object(meta_map) = meta {
                for (key, shape_value) in shape_map {
                    if let Some(meta_value) = meta_map.get(key) {
                        let projected = if shape_value.is_object() {
                            project_metadata(meta_value, shape_value)
                        } else {
                            meta_value.clone()
                        };
                        out.insert(key.clone(), projected);
                    }
                }
            }
            Value::Object(out)
        }
        _ => meta.clone(),
    }
}
