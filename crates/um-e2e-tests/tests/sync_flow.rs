//! End-to-end tests for the bidirectional sync plane.

mod helpers;

use std::time::Duration;

use helpers::TestHarness;
use serde_json::json;
use um_protocol::errors::ShadowError;
use um_shadowd::sync::direction::SyncDirection;
use um_shadowd::sync::requests::{ShadowKey, SyncAction, SyncRequest};
use um_shadowd::sync::workers;
use um_store::sync as sync_info;

#[tokio::test]
async fn local_updates_coalesce_in_queue() {
    let harness = TestHarness::synced().await;
    let queue = harness.manager.handler_context().sync_gate.queue.clone();

    for i in 0..3 {
        harness
            .update("gw-01", "config", json!({"state": {"reported": {"n": i}}}))
            .await
            .unwrap();
    }

    // Three updates for one key collapse into a single entry carrying
    // the newest version.
    assert_eq!(queue.len().await, 1);
    let merged = queue.poll().await.unwrap();
    assert_eq!(merged.key, ShadowKey::new("gw-01", "config"));
    assert_eq!(merged.version(), Some(3));
    match merged.action {
        SyncAction::LocalUpdate { payload, .. } => {
            assert_eq!(payload["state"]["reported"]["n"], 2);
        }
        other => panic!("unexpected action: {other:?}"),
    }
}

#[tokio::test]
async fn unsynced_shadows_do_not_enqueue() {
    let harness = TestHarness::synced().await;
    harness
        .update("gw-01", "unsynced", json!({"state": {"reported": {"n": 1}}}))
        .await
        .unwrap();
    harness
        .update("gw-99", "config", json!({"state": {"reported": {"n": 1}}}))
        .await
        .unwrap();
    assert!(harness.manager.handler_context().sync_gate.queue.is_empty().await);
}

#[tokio::test]
async fn local_update_pushes_patch_to_cloud() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();
    let queue = harness.manager.handler_context().sync_gate.queue.clone();

    harness
        .update("gw-01", "config", json!({"state": {"reported": {"fw": "1.2"}}}))
        .await
        .unwrap();
    let request = queue.poll().await.unwrap();
    workers::execute(&ctx, &request).await.unwrap();

    let updates = harness.cloud.updates();
    assert_eq!(updates.len(), 1);
    let (thing, shadow, payload) = &updates[0];
    assert_eq!(thing, "gw-01");
    assert_eq!(shadow, "config");
    assert_eq!(payload["state"]["reported"]["fw"], "1.2");

    let row = sync_info::get_row(&ctx.pool, "gw-01", "config")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.local_version, 1);
    assert_eq!(row.cloud_version, 1);
    assert!(!row.cloud_deleted);
    assert!(row.last_sync_time > 0);
    assert!(row.last_synced_document.is_some());
}

#[tokio::test]
async fn local_delete_propagates_version_body() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();
    let queue = harness.manager.handler_context().sync_gate.queue.clone();

    harness
        .update("gw-01", "config", json!({"state": {"reported": {"a": 1}}}))
        .await
        .unwrap();
    queue.clear().await;
    harness.delete("gw-01", "config").await.unwrap();

    let request = queue.poll().await.unwrap();
    assert!(matches!(request.action, SyncAction::LocalDelete { version: 1 }));
    workers::execute(&ctx, &request).await.unwrap();

    let deletes = harness.cloud.deletes();
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].2, json!({"version": 1}));

    let row = sync_info::get_row(&ctx.pool, "gw-01", "config")
        .await
        .unwrap()
        .unwrap();
    assert!(row.cloud_deleted);
}

#[tokio::test]
async fn cloud_documents_event_applies_locally() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();
    let queue = harness.manager.handler_context().sync_gate.queue.clone();

    let documents = serde_json::to_vec(&json!({
        "previous": null,
        "current": {
            "state": {"desired": {"mode": "eco"}},
            "metadata": {},
            "version": 4,
        },
        "timestamp": 1700000000,
    }))
    .unwrap();
    harness
        .manager
        .handle_cloud_message(
            "$aws/things/gw-01/shadow/name/config/update/documents",
            &documents,
        )
        .await;

    let request = queue.poll().await.expect("cloud update enqueued");
    workers::execute(&ctx, &request).await.unwrap();

    let stored = harness.get("gw-01", "config").await.unwrap();
    assert_eq!(stored["state"]["desired"]["mode"], "eco");

    let row = sync_info::get_row(&ctx.pool, "gw-01", "config")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.cloud_version, 4);
    assert_eq!(row.local_version, 1);

    // A cloud-applied update must not bounce back into the queue.
    assert!(queue.is_empty().await);
}

#[tokio::test]
async fn stale_cloud_version_is_a_fatal_conflict() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();

    let mut row = sync_info::SyncRow::new("gw-01", "config");
    row.cloud_version = 5;
    sync_info::update_row(&ctx.pool, &row).await.unwrap();

    let request = SyncRequest::cloud_update("gw-01", "config", json!({"state": {}}), 3);
    let err = workers::execute(&ctx, &request).await.unwrap_err();
    assert!(matches!(err, ShadowError::Conflict(_)));
    assert_eq!(
        workers::classify_failure(&err),
        workers::FailureAction::Drop
    );
}

#[tokio::test]
async fn cloud_delete_of_absent_local_shadow_succeeds() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();

    let request = SyncRequest::cloud_delete("gw-01", "config", 7);
    workers::execute(&ctx, &request).await.unwrap();

    let row = sync_info::get_row(&ctx.pool, "gw-01", "config")
        .await
        .unwrap()
        .unwrap();
    assert!(row.cloud_deleted);
    assert_eq!(row.cloud_version, 7);
}

#[tokio::test]
async fn unknown_shadow_is_skippable() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();

    let request = SyncRequest::local_update(
        "gw-55",
        "nowhere",
        json!({"state": {"reported": {"a": 1}}}),
        1,
    );
    let err = workers::execute(&ctx, &request).await.unwrap_err();
    assert!(matches!(err, ShadowError::UnknownShadow(_)));
    assert_eq!(
        workers::classify_failure(&err),
        workers::FailureAction::Skip
    );
}

#[tokio::test]
async fn overwrite_local_pulls_full_cloud_document() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();

    harness
        .update(
            "gw-01",
            "config",
            json!({"state": {"reported": {"stale": true, "keep": 1}}}),
        )
        .await
        .unwrap();
    harness.cloud.set_shadow(
        "gw-01",
        "config",
        json!({
            "state": {"reported": {"keep": 1, "fresh": true}},
            "version": 9,
        }),
    );

    let request = SyncRequest::new(
        ShadowKey::new("gw-01", "config"),
        SyncAction::OverwriteLocal,
    );
    workers::execute(&ctx, &request).await.unwrap();

    let stored = harness.get("gw-01", "config").await.unwrap();
    assert_eq!(stored["state"]["reported"], json!({"keep": 1, "fresh": true}));

    let row = sync_info::get_row(&ctx.pool, "gw-01", "config")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.cloud_version, 9);
}

#[tokio::test]
async fn realtime_worker_drains_queue_end_to_end() {
    let harness = TestHarness::synced().await;

    // Cloud session comes up: workers and subscriptions start.
    harness.manager.on_connected().await;
    assert!(
        harness
            .cloud_channel
            .is_subscribed_to("$aws/things/gw-01/shadow/name/config/update/documents")
    );

    harness
        .update("gw-01", "config", json!({"state": {"reported": {"live": true}}}))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while harness.cloud.updates().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "worker never synced");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(harness.cloud.updates()[0].2["state"]["reported"]["live"], true);

    harness.manager.shutdown().await;
}

#[tokio::test]
async fn retryable_failures_are_requeued() {
    let harness = TestHarness::synced().await;
    let ctx = harness.sync_context();

    harness.cloud.fail_with(Some(ShadowError::Service("cloud down".into())));
    let request = SyncRequest::local_update(
        "gw-01",
        "config",
        json!({"state": {"reported": {"a": 1}}}),
        1,
    );
    let err = workers::execute(&ctx, &request).await.unwrap_err();
    assert_eq!(
        workers::classify_failure(&err),
        workers::FailureAction::Retry
    );

    harness.cloud.fail_with(None);
    workers::execute(&ctx, &request).await.unwrap();
}

#[tokio::test]
async fn direction_change_clears_pending_work() {
    let harness = TestHarness::synced().await;
    let queue = harness.manager.handler_context().sync_gate.queue.clone();

    harness
        .update("gw-01", "config", json!({"state": {"reported": {"n": 1}}}))
        .await
        .unwrap();
    assert_eq!(queue.len().await, 1);

    harness
        .manager
        .set_direction(SyncDirection::CloudToDevice)
        .await;
    assert!(queue.is_empty().await);

    // Local writes no longer enqueue sync work.
    harness
        .update("gw-01", "config", json!({"state": {"reported": {"n": 2}}}))
        .await
        .unwrap();
    assert!(queue.is_empty().await);

    // Cloud events flow again once the direction permits them.
    harness
        .manager
        .handle_cloud_message(
            "$aws/things/gw-01/shadow/name/config/delete/accepted",
            br#"{"version": 3}"#,
        )
        .await;
    assert_eq!(queue.len().await, 1);
}
