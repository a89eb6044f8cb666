//! Shadow document model.
//!
//! Follows the AWS IoT Shadow shape: a `state` object with `desired` and
//! `reported` sub-states, a `metadata` tree mirroring `state` where every
//! leaf carries an update timestamp, and a strictly monotonic `version`.
//! The top-level `delta` and `timestamp` fields are computed on emission,
//! never stored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::ShadowError;
use crate::merge::{delta_state, project_metadata};

/// The `desired`/`reported` pair stored for a shadow.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ShadowState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reported: Option<Value>,
}

/// A stored shadow document for one (thing, shadow) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowDocument {
    pub state: ShadowState,
    /// Mirrors the shape of `state`; every leaf is `{"timestamp": secs}`.
    #[serde(default = "empty_object")]
    pub metadata: Value,
    pub version: u64,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl ShadowDocument {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShadowError> {
        serde_json::from_slice(bytes)
            .map_err(|e| ShadowError::Service(format!("corrupt shadow document: {e}")))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Structural diff of `desired` against `reported`. `None` when empty.
    pub fn delta(&self) -> Option<Value> {
        let desired = self.state.desired.as_ref()?;
        match self.state.reported.as_ref() {
            Some(reported) => delta_state(desired, reported),
            None => delta_state(desired, &Value::Null),
        }
    }

    /// Full response payload for `get`/`update` accepted events.
    ///
    /// Includes the computed delta under `state.delta` when non-empty.
    pub fn response_payload(&self, now: i64, client_token: Option<&str>) -> Vec<u8> {
        let mut state = Map::new();
        if let Some(desired) = &self.state.desired {
            state.insert("desired".into(), desired.clone());
        }
        if let Some(reported) = &self.state.reported {
            state.insert("reported".into(), reported.clone());
        }
        if let Some(delta) = self.delta() {
            state.insert("delta".into(), delta);
        }

        let mut doc = Map::new();
        doc.insert("state".into(), Value::Object(state));
        doc.insert("metadata".into(), self.metadata.clone());
        doc.insert("version".into(), json!(self.version));
        doc.insert("timestamp".into(), json!(now));
        if let Some(token) = client_token {
            doc.insert("clientToken".into(), json!(token));
        }
        serde_json::to_vec(&Value::Object(doc)).unwrap_or_default()
    }

    /// Metadata subtree for the `desired` section.
    pub fn desired_metadata(&self) -> Option<&Value> {
        self.metadata.get("desired")
    }
}

/// Payload for the `update/delta` event.
pub fn delta_event_payload(
    delta: &Value,
    desired_metadata: Option<&Value>,
    version: u64,
    now: i64,
    client_token: Option<&str>,
) -> Vec<u8> {
    let metadata = desired_metadata
        .map(|meta| project_metadata(meta, delta))
        .unwrap_or_else(empty_object);

    let mut doc = Map::new();
    doc.insert("version".into(), json!(version));
    doc.insert("timestamp".into(), json!(now));
    doc.insert("state".into(), delta.clone());
    doc.insert("metadata".into(), metadata);
    if let Some(token) = client_token {
        doc.insert("clientToken".into(), json!(token));
    }
    serde_json::to_vec(&Value::Object(doc)).unwrap_or_default()
}

/// Payload for the `update/documents` and `delete/documents` events.
///
/// A delete carries only `previous`; a first create carries a null
/// `previous`.
pub fn documents_event_payload(
    previous: Option<&ShadowDocument>,
    current: Option<&ShadowDocument>,
    now: i64,
    client_token: Option<&str>,
) -> Vec<u8> {
    fn snapshot(doc: &ShadowDocument) -> Value {
        json!({
            "state": doc.state,
            "metadata": doc.metadata,
            "version": doc.version,
        })
    }

    let mut doc = Map::new();
    doc.insert(
        "previous".into(),
        previous.map(snapshot).unwrap_or(Value::Null),
    );
    if let Some(current) = current {
        doc.insert("current".into(), snapshot(current));
    }
    doc.insert("timestamp".into(), json!(now));
    if let Some(token) = client_token {
        doc.insert("clientToken".into(), json!(token));
    }
    serde_json::to_vec(&Value::Object(doc)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> ShadowDocument {
        ShadowDocument {
            state: ShadowState {
                desired: Some(json!({"color": "red", "power": 7})),
                reported: Some(json!({"color": "red", "power": 5})),
            },
            metadata: json!({
                "desired": {"color": {"timestamp": 100}, "power": {"timestamp": 100}},
                "reported": {"color": {"timestamp": 90}, "power": {"timestamp": 90}},
            }),
            version: 3,
        }
    }

    #[test]
    fn stored_roundtrip() {
        let doc = sample_document();
        let parsed = ShadowDocument::from_bytes(&doc.to_bytes()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn delta_excludes_matching_leaves() {
        let doc = sample_document();
        let delta = doc.delta().unwrap();
        assert_eq!(delta, json!({"power": 7}));
    }

    #[test]
    fn response_payload_carries_delta_and_token() {
        let doc = sample_document();
        let payload = doc.response_payload(12345, Some("token-1"));
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["state"]["delta"], json!({"power": 7}));
        assert_eq!(value["version"], 3);
        assert_eq!(value["timestamp"], 12345);
        assert_eq!(value["clientToken"], "token-1");
    }

    #[test]
    fn response_payload_without_delta() {
        let mut doc = sample_document();
        doc.state.reported = doc.state.desired.clone();
        let payload = doc.response_payload(1, None);
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert!(value["state"].get("delta").is_none());
        assert!(value.get("clientToken").is_none());
    }

    #[test]
    fn documents_payload_for_create_has_null_previous() {
        let doc = sample_document();
        let payload = documents_event_payload(None, Some(&doc), 7, None);
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert!(value["previous"].is_null());
        assert_eq!(value["current"]["version"], 3);
    }

    #[test]
    fn documents_payload_for_delete_has_previous_only() {
        let doc = sample_document();
        let payload = documents_event_payload(Some(&doc), None, 7, None);
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["previous"]["version"], 3);
        assert!(value.get("current").is_none());
    }

    #[test]
    fn delta_event_projects_metadata() {
        let doc = sample_document();
        let delta = doc.delta().unwrap();
        let payload =
            delta_event_payload(&delta, doc.desired_metadata(), doc.version, 200, None);
        let value: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(value["state"], json!({"power": 7}));
        assert_eq!(value["metadata"], json!({"power": {"timestamp": 100}}));
        assert_eq!(value["version"], 3);
    }
}
