//! Error model for the shadow manager.
//!
//! Every local request path maps its failure to one of these kinds and
//! publishes an [`ErrorMessage`] on the matching `rejected` topic before
//! returning to the caller.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which bucket refused a throttled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttle {
    Total,
    PerThing,
}

/// Errors surfaced by shadow operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShadowError {
    #[error("{0}")]
    InvalidArguments(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("service error: {0}")]
    Service(String),

    /// Rate limiter refusal. Surfaced to callers as a service error.
    #[error("too many requests")]
    Throttled(Throttle),

    /// Install-time configuration failure. Never published on a topic.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Missing sync bookkeeping row. Sync-only, skipped by workers.
    #[error("no sync information for {0}")]
    UnknownShadow(String),
}

impl ShadowError {
    /// HTTP-style code published on the `rejected` topic.
    pub fn code(&self) -> u16 {
        match self {
            ShadowError::InvalidArguments(_) => 400,
            ShadowError::Unauthorized(_) => 401,
            ShadowError::Forbidden(_) => 403,
            ShadowError::NotFound(_) | ShadowError::UnknownShadow(_) => 404,
            ShadowError::Conflict(_) => 409,
            ShadowError::PayloadTooLarge(_) => 413,
            ShadowError::Service(_)
            | ShadowError::Throttled(_)
            | ShadowError::InvalidConfiguration(_) => 500,
        }
    }

    pub fn version_conflict() -> Self {
        ShadowError::Conflict("Version conflict".into())
    }

    pub fn shadow_not_found(shadow_name: &str) -> Self {
        if shadow_name.is_empty() {
            ShadowError::NotFound("No shadow exists".into())
        } else {
            ShadowError::NotFound(format!("No shadow exists with name: {shadow_name}"))
        }
    }
}

/// Payload published on `rejected` topics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorMessage {
    pub code: u16,
    pub message: String,
    /// Epoch milliseconds at rejection time.
    pub timestamp: i64,
}

impl ErrorMessage {
    pub fn from_error(err: &ShadowError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // ErrorMessage has no map keys that can fail to serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_http_style() {
        assert_eq!(ShadowError::InvalidArguments("x".into()).code(), 400);
        assert_eq!(ShadowError::Unauthorized("x".into()).code(), 401);
        assert_eq!(ShadowError::Forbidden("x".into()).code(), 403);
        assert_eq!(ShadowError::NotFound("x".into()).code(), 404);
        assert_eq!(ShadowError::Conflict("x".into()).code(), 409);
        assert_eq!(ShadowError::PayloadTooLarge("x".into()).code(), 413);
        assert_eq!(ShadowError::Service("x".into()).code(), 500);
        assert_eq!(ShadowError::Throttled(Throttle::PerThing).code(), 500);
    }

    #[test]
    fn error_message_roundtrip() {
        let msg = ErrorMessage::from_error(&ShadowError::version_conflict());
        let parsed: ErrorMessage = serde_json::from_slice(&msg.to_bytes()).unwrap();
        assert_eq!(parsed.code, 409);
        assert_eq!(parsed.message, "Version conflict");
        assert!(parsed.timestamp > 0);
    }

    #[test]
    fn named_shadow_not_found_message() {
        let err = ShadowError::shadow_not_found("telemetry");
        assert_eq!(err.to_string(), "No shadow exists with name: telemetry");
        let classic = ShadowError::shadow_not_found("");
        assert_eq!(classic.to_string(), "No shadow exists");
    }
}
