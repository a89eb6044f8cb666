//! End-to-end tests for install, startup reconciliation, connectivity
//! reactions, and shutdown.

mod helpers;

use helpers::TestHarness;
use serde_json::json;
use tokio::sync::watch;
use um_protocol::errors::ShadowError;
use um_shadowd::config::ServiceConfig;
use um_shadowd::orchestrator::ServiceState;
use um_store::sync as sync_info;

#[tokio::test]
async fn bad_configuration_fails_install() {
    let err = ServiceConfig::from_toml(
        r#"
thing_name = "gw-01"
surprise = 1
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ShadowError::InvalidConfiguration(_)));

    let err = ServiceConfig::from_toml(
        r#"
thing_name = "gw-01"

[limits]
shadow_document_size_limit_bytes = 0
"#,
    )
    .unwrap_err();
    assert!(matches!(err, ShadowError::InvalidConfiguration(_)));
}

#[tokio::test]
async fn startup_reconciles_sync_rows() {
    let harness = TestHarness::synced().await;
    let pool = harness.manager.handler_context().pool.clone();

    // Configured shadows have rows after startup.
    let rows = sync_info::list_rows(&pool).await.unwrap();
    let keys: Vec<(String, String)> = rows
        .iter()
        .map(|r| (r.thing_name.clone(), r.shadow_name.clone()))
        .collect();
    assert!(keys.contains(&("gw-01".into(), "".into())));
    assert!(keys.contains(&("gw-01".into(), "config".into())));
    assert_eq!(keys.len(), 2);

    // A stale row left behind by an older configuration is removed on
    // the next startup pass.
    sync_info::insert_if_absent(&pool, &sync_info::SyncRow::new("gw-09", "old"))
        .await
        .unwrap();
    harness.manager.startup().await.unwrap();
    let rows = sync_info::list_rows(&pool).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(!rows.iter().any(|r| r.thing_name == "gw-09"));
}

#[tokio::test]
async fn disconnect_retains_queued_requests() {
    let harness = TestHarness::synced().await;
    let queue = harness.manager.handler_context().sync_gate.queue.clone();

    harness.manager.on_connected().await;
    harness.manager.on_disconnected().await;
    assert!(harness.cloud_channel.active_subscriptions().is_empty());

    harness
        .update("gw-01", "config", json!({"state": {"reported": {"n": 1}}}))
        .await
        .unwrap();
    assert_eq!(queue.len().await, 1);

    // Reconnect finds the work still queued and resubscribes.
    harness.manager.on_connected().await;
    assert!(
        !harness.cloud_channel.active_subscriptions().is_empty(),
        "subscriptions rebuilt on reconnect"
    );
    harness.manager.shutdown().await;
}

#[tokio::test]
async fn thing_name_change_rebuilds_sync_set() {
    let harness = TestHarness::synced().await;
    let pool = harness.manager.handler_context().pool.clone();

    let (tx, rx) = watch::channel("gw-01".to_string());
    let watcher = harness.manager.watch_core_thing_name(rx);

    tx.send("gw-77".to_string()).unwrap();
    // Wait for the watcher task to apply the change.
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        let rows = sync_info::list_rows(&pool).await.unwrap();
        if rows.iter().all(|r| r.thing_name == "gw-77") && rows.len() == 2 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "thing name change never applied"
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let gate = harness.manager.handler_context().sync_gate.clone();
    assert!(gate.contains("gw-77", "config"));
    assert!(!gate.contains("gw-01", "config"));

    watcher.abort();
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let harness = TestHarness::synced().await;
    harness.manager.on_connected().await;

    harness.manager.shutdown().await;
    assert_eq!(harness.manager.state().await, ServiceState::Stopped);
    // A second shutdown is a no-op, close errors and all.
    harness.manager.shutdown().await;
    assert_eq!(harness.manager.state().await, ServiceState::Stopped);
}
