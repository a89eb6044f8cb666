//! End-to-end tests for the local IPC operations.

mod helpers;

use std::sync::Arc;

use helpers::{TestHarness, assert_no_event, expect_event};
use serde_json::json;
use um_protocol::errors::ShadowError;
use um_shadowd::auth::DenyAll;

#[tokio::test]
async fn desired_then_reported_resolves_delta() {
    let harness = TestHarness::new().await;
    let mut events = harness.subscribe_events();

    // First update sets desired state: version 1 with a delta.
    let first = harness
        .update("gw-01", "", json!({"state": {"desired": {"c": 1}}}))
        .await
        .unwrap();
    assert_eq!(first["version"], 1);
    assert_eq!(first["state"]["delta"], json!({"c": 1}));

    let delta = expect_event(&mut events, "$aws/things/gw-01/shadow/update/delta").await;
    let delta: serde_json::Value = serde_json::from_slice(&delta.payload).unwrap();
    assert_eq!(delta["state"], json!({"c": 1}));
    assert_eq!(delta["version"], 1);

    // Reporting the matching value clears the delta.
    let second = harness
        .update("gw-01", "", json!({"state": {"reported": {"c": 1}}}))
        .await
        .unwrap();
    assert_eq!(second["version"], 2);
    assert!(second["state"].get("delta").is_none());
    assert_no_event(&mut events, "$aws/things/gw-01/shadow/update/delta");

    // The stored document holds both sections.
    let stored = harness.get("gw-01", "").await.unwrap();
    assert_eq!(stored["state"]["desired"]["c"], 1);
    assert_eq!(stored["state"]["reported"]["c"], 1);
}

#[tokio::test]
async fn event_order_is_accepted_delta_documents() {
    let harness = TestHarness::new().await;
    let mut events = harness.subscribe_events();

    harness
        .update("gw-01", "config", json!({"state": {"desired": {"x": 1}}}))
        .await
        .unwrap();

    let prefix = "$aws/things/gw-01/shadow/name/config/update";
    let mut topics = Vec::new();
    while let Ok(message) = events.try_recv() {
        topics.push(message.topic);
    }
    assert_eq!(
        topics,
        [
            format!("{prefix}/accepted"),
            format!("{prefix}/delta"),
            format!("{prefix}/documents"),
        ]
    );
}

#[tokio::test]
async fn version_conflict_rejected_without_mutation() {
    let harness = TestHarness::new().await;
    for i in 0..5 {
        harness
            .update("gw-01", "", json!({"state": {"desired": {"n": i}}}))
            .await
            .unwrap();
    }

    let mut events = harness.subscribe_events();
    let err = harness
        .update("gw-01", "", json!({"version": 3, "state": {"desired": {"x": 1}}}))
        .await
        .unwrap_err();
    assert_eq!(err, ShadowError::Conflict("Version conflict".into()));

    let rejected = expect_event(&mut events, "$aws/things/gw-01/shadow/update/rejected").await;
    let rejected: serde_json::Value = serde_json::from_slice(&rejected.payload).unwrap();
    assert_eq!(rejected["code"], 409);

    let stored = harness.get("gw-01", "").await.unwrap();
    assert_eq!(stored["version"], 5);
    assert!(stored["state"]["desired"].get("x").is_none());
}

#[tokio::test]
async fn deep_nesting_rejected() {
    let harness = TestHarness::new().await;
    let mut events = harness.subscribe_events();

    // Seven container levels counting state as the first: one past the limit.
    let payload = json!({"state": {"desired": {"a": {"b": {"c": {"d": {"e": {"f": 1}}}}}}}});
    let err = harness.update("gw-01", "", payload).await.unwrap_err();
    assert_eq!(
        err,
        ShadowError::InvalidArguments(
            "JSON contains too many levels of nesting; maximum is 6".into()
        )
    );

    let rejected = expect_event(&mut events, "$aws/things/gw-01/shadow/update/rejected").await;
    let rejected: serde_json::Value = serde_json::from_slice(&rejected.payload).unwrap();
    assert_eq!(rejected["code"], 400);
}

#[tokio::test]
async fn pagination_with_opaque_tokens() {
    let harness = TestHarness::new().await;
    for name in ["alpha", "bravo", "charlie", "delta"] {
        harness
            .update("gw-01", name, json!({"state": {"reported": {"ok": true}}}))
            .await
            .unwrap();
    }

    // First page of one positions the cursor at offset 1.
    let first = harness.list("gw-01", None, Some(1)).await.unwrap();
    assert_eq!(first.results, ["alpha"]);
    let token = first.next_token.expect("full page yields a token");

    let second = harness
        .list("gw-01", Some(token), Some(2))
        .await
        .unwrap();
    assert_eq!(second.results, ["bravo", "charlie"]);
    let token = second.next_token.expect("full page yields a token");

    // The token is bound to the thing that minted it.
    let ctx = harness.manager.handler_context();
    assert_eq!(ctx.token_cipher.decode(&token, "gw-01").unwrap(), 3);
    let err = harness
        .list("gw-02", Some(token.clone()), Some(2))
        .await
        .unwrap_err();
    assert_eq!(err, ShadowError::InvalidArguments("Invalid nextToken".into()));

    // The final page is short and carries no token.
    let last = harness.list("gw-01", Some(token), Some(2)).await.unwrap();
    assert_eq!(last.results, ["delta"]);
    assert!(last.next_token.is_none());
}

#[tokio::test]
async fn list_rejects_bad_page_size() {
    let harness = TestHarness::new().await;
    for size in [0, 101] {
        let err = harness.list("gw-01", None, Some(size)).await.unwrap_err();
        assert!(matches!(err, ShadowError::InvalidArguments(_)));
    }
    // In-range sizes are fine even with no shadows stored.
    let empty = harness.list("gw-01", None, Some(100)).await.unwrap();
    assert!(empty.results.is_empty());
    assert!(empty.next_token.is_none());
}

#[tokio::test]
async fn delete_publishes_previous_and_returns_version() {
    let harness = TestHarness::new().await;
    harness
        .update("gw-01", "config", json!({"state": {"reported": {"a": 1}}}))
        .await
        .unwrap();
    harness
        .update("gw-01", "config", json!({"state": {"reported": {"a": 2}}}))
        .await
        .unwrap();

    let mut events = harness.subscribe_events();
    let response = harness.delete("gw-01", "config").await.unwrap();
    assert_eq!(response, json!({"version": 2}));

    let prefix = "$aws/things/gw-01/shadow/name/config/delete";
    let accepted = expect_event(&mut events, &format!("{prefix}/accepted")).await;
    assert!(accepted.payload.is_empty());

    let documents = expect_event(&mut events, &format!("{prefix}/documents")).await;
    let documents: serde_json::Value = serde_json::from_slice(&documents.payload).unwrap();
    assert_eq!(documents["previous"]["version"], 2);
    assert_eq!(documents["previous"]["state"]["reported"]["a"], 2);
    assert!(documents.get("current").is_none());

    // The shadow is gone; a second delete is a 404.
    let err = harness.get("gw-01", "config").await.unwrap_err();
    assert_eq!(err, ShadowError::shadow_not_found("config"));
    let err = harness.delete("gw-01", "config").await.unwrap_err();
    assert_eq!(err.code(), 404);
}

#[tokio::test]
async fn get_missing_shadow_is_not_found() {
    let harness = TestHarness::new().await;
    let mut events = harness.subscribe_events();

    let err = harness.get("gw-01", "absent").await.unwrap_err();
    assert_eq!(
        err,
        ShadowError::NotFound("No shadow exists with name: absent".into())
    );

    let rejected = expect_event(
        &mut events,
        "$aws/things/gw-01/shadow/name/absent/get/rejected",
    )
    .await;
    let rejected: serde_json::Value = serde_json::from_slice(&rejected.payload).unwrap();
    assert_eq!(rejected["code"], 404);
}

#[tokio::test]
async fn invalid_names_rejected() {
    let harness = TestHarness::new().await;
    let err = harness
        .update("bad thing", "", json!({"state": {}}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 400);

    let err = harness.get("gw-01", "bad/shadow").await.unwrap_err();
    assert_eq!(err.code(), 400);

    let err = harness.get("", "config").await.unwrap_err();
    assert_eq!(err.code(), 400);
}

#[tokio::test]
async fn client_token_echoed_in_responses() {
    let harness = TestHarness::new().await;
    let mut events = harness.subscribe_events();

    let response = harness
        .update(
            "gw-01",
            "",
            json!({"clientToken": "req-42", "state": {"desired": {"c": 1}}}),
        )
        .await
        .unwrap();
    assert_eq!(response["clientToken"], "req-42");

    let delta = expect_event(&mut events, "$aws/things/gw-01/shadow/update/delta").await;
    let delta: serde_json::Value = serde_json::from_slice(&delta.payload).unwrap();
    assert_eq!(delta["clientToken"], "req-42");

    let documents =
        expect_event(&mut events, "$aws/things/gw-01/shadow/update/documents").await;
    let documents: serde_json::Value = serde_json::from_slice(&documents.payload).unwrap();
    assert_eq!(documents["clientToken"], "req-42");
}

#[tokio::test]
async fn unauthorized_caller_rejected() {
    let harness = TestHarness::with_config(helpers::DEFAULT_CONFIG, Arc::new(DenyAll)).await;
    let mut events = harness.subscribe_events();

    let err = harness
        .update("gw-01", "", json!({"state": {"desired": {"c": 1}}}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 401);

    let rejected = expect_event(&mut events, "$aws/things/gw-01/shadow/update/rejected").await;
    let rejected: serde_json::Value = serde_json::from_slice(&rejected.payload).unwrap();
    assert_eq!(rejected["code"], 401);
}

#[tokio::test]
async fn per_thing_throttle_surfaces_as_service_error() {
    let config = r#"
thing_name = "gw-01"

[store]
db_path = ":memory:"

[rate_limits]
max_local_requests_rate_per_thing = 2
"#;
    let harness = TestHarness::with_config(config, Arc::new(um_shadowd::auth::AllowAll)).await;

    harness
        .update("gw-01", "", json!({"state": {"reported": {"n": 1}}}))
        .await
        .unwrap();
    harness
        .update("gw-01", "", json!({"state": {"reported": {"n": 2}}}))
        .await
        .unwrap();

    let err = harness
        .update("gw-01", "", json!({"state": {"reported": {"n": 3}}}))
        .await
        .unwrap_err();
    assert_eq!(err.code(), 500);

    // Another thing still has budget.
    harness
        .update("gw-02", "", json!({"state": {"reported": {"n": 1}}}))
        .await
        .unwrap();
}

#[tokio::test]
async fn noop_update_bumps_version_only() {
    let harness = TestHarness::new().await;
    harness
        .update("gw-01", "", json!({"state": {"desired": {"a": 1}, "reported": {"a": 1}}}))
        .await
        .unwrap();

    let mut events = harness.subscribe_events();
    let response = harness.update("gw-01", "", json!({"state": {}})).await.unwrap();
    assert_eq!(response["version"], 2);
    assert_no_event(&mut events, "$aws/things/gw-01/shadow/update/delta");
}
