//! Request validation: thing/shadow names and update payloads.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::errors::ShadowError;

/// Default cap on a serialized shadow document.
pub const DEFAULT_DOC_SIZE_LIMIT: usize = 8192;
/// Hard ceiling for the configurable document size limit.
pub const MAX_DOC_SIZE_LIMIT: usize = 30720;
/// Maximum nesting depth of the `state` node, counting `state` as level 1.
pub const MAX_STATE_DEPTH: usize = 6;
/// Maximum length of thing and shadow names.
pub const MAX_NAME_LENGTH: usize = 128;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9:_-]+$").expect("valid name pattern"))
}

pub fn validate_thing_name(thing_name: &str) -> Result<(), ShadowError> {
    if thing_name.is_empty() {
        return Err(ShadowError::InvalidArguments(
            "ThingName absent in request".into(),
        ));
    }
    validate_name(thing_name, "ThingName")
}

/// Shadow names are optional; the empty string denotes the classic shadow.
pub fn validate_shadow_name(shadow_name: &str) -> Result<(), ShadowError> {
    if shadow_name.is_empty() {
        return Ok(());
    }
    validate_name(shadow_name, "ShadowName")
}

fn validate_name(name: &str, field: &str) -> Result<(), ShadowError> {
    if name.len() > MAX_NAME_LENGTH {
        return Err(ShadowError::InvalidArguments(format!(
            "{field} has a maximum length of {MAX_NAME_LENGTH}"
        )));
    }
    if !name_pattern().is_match(name) {
        return Err(ShadowError::InvalidArguments(format!(
            "{field} must match pattern [a-zA-Z0-9:_-]+"
        )));
    }
    Ok(())
}

/// A parsed and schema-checked update request document.
///
/// `desired`/`reported` distinguish an absent key (`None`, leave the
/// section untouched) from an explicit JSON null (`Some(Null)`, clear the
/// section).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdatePayload {
    pub desired: Option<Value>,
    pub reported: Option<Value>,
    pub version: Option<u64>,
    pub client_token: Option<String>,
}

/// Parse and validate an update payload against the document schema.
pub fn validate_update_payload(
    bytes: &[u8],
    max_size: usize,
) -> Result<UpdatePayload, ShadowError> {
    if bytes.is_empty() {
        return Err(ShadowError::Forbidden("Missing update payload".into()));
    }
    if bytes.len() > max_size {
        return Err(ShadowError::PayloadTooLarge(
            "The payload exceeds the maximum size allowed".into(),
        ));
    }

    let root: Value = serde_json::from_slice(bytes)
        .map_err(|_| ShadowError::InvalidArguments("Invalid JSON".into()))?;
    let root = root
        .as_object()
        .ok_or_else(|| ShadowError::InvalidArguments("Invalid JSON".into()))?;

    let state = root.get("state").ok_or_else(|| {
        ShadowError::InvalidArguments("Missing required node: state".into())
    })?;
    let state_map = match state {
        Value::Object(map) => map,
        _ => {
            return Err(ShadowError::InvalidArguments(
                "State node must be an object".into(),
            ));
        }
    };

    if json_depth(state) > MAX_STATE_DEPTH {
        return Err(ShadowError::InvalidArguments(format!(
            "JSON contains too many levels of nesting; maximum is {MAX_STATE_DEPTH}"
        )));
    }

    let mut payload = UpdatePayload::default();
    for (key, value) in state_map {
        match key.as_str() {
            "desired" => payload.desired = Some(validate_section(value, "Desired")?),
            "reported" => payload.reported = Some(validate_section(value, "Reported")?),
            other => {
                return Err(ShadowError::InvalidArguments(format!(
                    "State node can only contain desired and reported nodes, found: {other}"
                )));
            }
        }
    }

    if let Some(version) = root.get("version") {
        payload.version = Some(version.as_u64().ok_or_else(|| {
            ShadowError::InvalidArguments(
                "Invalid version. Version must be a non-negative integer".into(),
            )
        })?);
    }

    if let Some(token) = root.get("clientToken") {
        let token = token.as_str().ok_or_else(|| {
            ShadowError::InvalidArguments("Invalid clientToken".into())
        })?;
        payload.client_token = Some(token.to_string());
    }

    Ok(payload)
}

fn validate_section(value: &Value, field: &str) -> Result<Value, ShadowError> {
    match value {
        Value::Object(_) | Value::Null => Ok(value.clone()),
        _ => Err(ShadowError::InvalidArguments(format!(
            "{field} node must be an object"
        ))),
    }
}

/// Nesting depth of a JSON value. Containers count one level, scalars
/// none, so a bare `{"a": 1}` has depth 1.
fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
