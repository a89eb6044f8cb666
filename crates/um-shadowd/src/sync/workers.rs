//! Sync workers: drain the request queue and reconcile local and cloud
//! shadow state.
//!
//! Each request executes under a per-attempt timeout. Failures classify
//! into retryable (requeued with exponential backoff), skippable
//! (logged and dropped), and fatal version conflicts (dropped).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Value, json};
use sqlx::SqlitePool;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use um_protocol::document::ShadowDocument;
use um_protocol::errors::ShadowError;
use um_store::{documents, sync as sync_info};

use crate::config::StrategyConfig;
use crate::handlers::{HandlerContext, RequestSource, delete::handle_delete, update::handle_update};
use crate::ratelimit::RateLimiter;
use crate::sync::cloud::CloudClient;
use crate::sync::queue::RequestQueue;
use crate::sync::requests::{ShadowKey, SyncAction, SyncRequest};

const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);
const BACKOFF_BASE_SECS: f64 = 3.0;
const BACKOFF_CAP_SECS: f64 = 60.0;

/// Everything a worker needs to execute sync requests.
pub struct SyncContext {
    pub pool: SqlitePool,
    pub handlers: Arc<HandlerContext>,
    pub cloud: Arc<dyn CloudClient>,
    /// Caps device-to-cloud publishes per second.
    pub outbound: Arc<RateLimiter>,
}

/// Worker scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Block on the queue; latency-optimal.
    RealTime,
    /// Wake every interval, drain everything ready, sleep again.
    Periodic(Duration),
}

impl From<&StrategyConfig> for SyncStrategy {
    fn from(config: &StrategyConfig) -> Self {
        match config {
            StrategyConfig::RealTime => SyncStrategy::RealTime,
            StrategyConfig::Periodic { delay } => {
                SyncStrategy::Periodic(Duration::from_secs(*delay))
            }
        }
    }
}

/// The sync worker pool.
pub struct SyncWorkers {
    queue: Arc<RequestQueue>,
    context: Arc<SyncContext>,
    strategy: SyncStrategy,
    worker_count: usize,
    stop_tx: Mutex<Option<watch::Sender<bool>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncWorkers {
    pub fn new(
        queue: Arc<RequestQueue>,
        context: Arc<SyncContext>,
        strategy: SyncStrategy,
        worker_count: usize,
    ) -> Self {
        Self {
            queue,
            context,
            strategy,
            worker_count: worker_count.max(1),
            stop_tx: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers. Idempotent while running.
    pub async fn start(&self) {
        let mut stop_tx = self.stop_tx.lock().await;
        if stop_tx.is_some() {
            return;
        }
        let (tx, _) = watch::channel(false);

        let mut handles = self.handles.lock().await;
        for worker in 0..self.worker_count {
            let queue = self.queue.clone();
            let context = self.context.clone();
            let stop_rx = tx.subscribe();
            let handle = match self.strategy {
                SyncStrategy::RealTime => {
                    tokio::spawn(run_realtime(queue, context, stop_rx))
                }
                SyncStrategy::Periodic(delay) => {
                    tokio::spawn(run_periodic(queue, context, delay, stop_rx))
                }
            };
            tracing::debug!(worker, strategy = ?self.strategy, "sync worker started");
            handles.push(handle);
        }
        *stop_tx = Some(tx);
    }

    /// Signal the workers and wait for them to finish their current
    /// request. Queued requests are retained.
    pub async fn stop(&self) {
        let Some(tx) = self.stop_tx.lock().await.take() else {
            return;
        };
        let _ = tx.send(true);
        for handle in self.handles.lock().await.drain(..) {
            let _ = handle.await;
        }
        tracing::debug!("sync workers stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.stop_tx.lock().await.is_some()
    }
}

async fn run_realtime(
    queue: Arc<RequestQueue>,
    context: Arc<SyncContext>,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            _ = stop_rx.changed() => break,
            request = queue.take() => request,
        };
        process(&context, &queue, request, &mut stop_rx).await;
        if *stop_rx.borrow() {
            break;
        }
    }
}

async fn run_periodic(
    queue: Arc<RequestQueue>,
    context: Arc<SyncContext>,
    delay: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        while let Some(request) = queue.poll().await {
            process(&context, &queue, request, &mut stop_rx).await;
            if *stop_rx.borrow() {
                return;
            }
        }
    }
}

async fn process(
    context: &SyncContext,
    queue: &RequestQueue,
    request: SyncRequest,
    stop_rx: &mut watch::Receiver<bool>,
) {
    let key = request.key.clone();
    let error = match tokio::time::timeout(ATTEMPT_TIMEOUT, execute(context, &request)).await {
        Ok(Ok(())) => return,
        Ok(Err(error)) => error,
        Err(_) => ShadowError::Service("sync attempt timed out".into()),
    };

    match classify_failure(&error) {
        FailureAction::Retry => {
            let mut retry = request;
            retry.attempts += 1;
            let delay = backoff_delay(retry.attempts);
            tracing::warn!(
                thing = %key.thing_name,
                shadow = %key.shadow_name,
                attempts = retry.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "sync request failed, retrying"
            );
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if !queue.offer(retry).await {
                tracing::warn!(
                    thing = %key.thing_name,
                    shadow = %key.shadow_name,
                    "sync queue full, dropping retry"
                );
            }
        }
        FailureAction::Skip => {
            tracing::debug!(
                thing = %key.thing_name,
                shadow = %key.shadow_name,
                error = %error,
                "skipping unsyncable request"
            );
        }
        FailureAction::Drop => {
            tracing::warn!(
                thing = %key.thing_name,
                shadow = %key.shadow_name,
                error = %error,
                "version conflict, dropping sync request"
            );
        }
    }
}

/// What to do with a failed sync attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Retry,
    Skip,
    Drop,
}

/// Pure classification of a sync failure.
pub fn classify_failure(error: &ShadowError) -> FailureAction {
    match error {
        ShadowError::Service(_) | ShadowError::Throttled(_) => FailureAction::Retry,
        ShadowError::Conflict(_) => FailureAction::Drop,
        _ => FailureAction::Skip,
    }
}

/// Exponential backoff: 3s doubling to a 60s cap, with 20% jitter.
pub fn backoff_delay(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(8);
    let base = (BACKOFF_BASE_SECS * f64::powi(2.0, exponent as i32)).min(BACKOFF_CAP_SECS);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(base * jitter)
}

/// Execute one sync request.
pub async fn execute(context: &SyncContext, request: &SyncRequest) -> Result<(), ShadowError> {
    let key = &request.key;
    match &request.action {
        SyncAction::LocalUpdate { payload, version } => {
            push_update_to_cloud(context, key, payload.clone(), *version).await
        }
        SyncAction::LocalDelete { version } => {
            let mut row = load_row(context, key).await?;
            context.outbound.acquire("cloud")?;
            context
                .cloud
                .delete_shadow(
                    &key.thing_name,
                    &key.shadow_name,
                    &json!({"version": version}),
                )
                .await?;
            row.local_version = *version as i64;
            row.cloud_version += 1;
            row.cloud_deleted = true;
            row.last_synced_document = None;
            row.last_sync_time = Utc::now().timestamp();
            sync_info::update_row(&context.pool, &row)
                .await
                .map_err(store_error)
        }
        SyncAction::CloudUpdate { document, version } => {
            let row = load_row(context, key).await?;
            if (*version as i64) <= row.cloud_version {
                return Err(ShadowError::Conflict(format!(
                    "stale cloud document version {version}, have {}",
                    row.cloud_version
                )));
            }
            apply_cloud_document(context, key, row, document, *version).await
        }
        SyncAction::CloudDelete { version } => {
            let mut row = load_row(context, key).await?;
            match handle_delete(
                &context.handlers,
                &key.thing_name,
                &key.shadow_name,
                RequestSource::Sync,
            )
            .await
            {
                Ok(_) => {}
                // Already absent locally: the delete has converged.
                Err(ShadowError::NotFound(_)) => {}
                Err(error) => return Err(error),
            }
            row.cloud_version = row.cloud_version.max(*version as i64);
            row.cloud_deleted = true;
            row.last_synced_document = None;
            row.last_sync_time = Utc::now().timestamp();
            sync_info::update_row(&context.pool, &row)
                .await
                .map_err(store_error)
        }
        SyncAction::OverwriteLocal => {
            let row = load_row(context, key).await?;
            match context
                .cloud
                .get_shadow(&key.thing_name, &key.shadow_name)
                .await?
            {
                Some(document) => {
                    let version = document
                        .get("version")
                        .and_then(Value::as_u64)
                        .unwrap_or((row.cloud_version + 1) as u64);
                    apply_cloud_document(context, key, row, &document, version).await
                }
                None => {
                    // Cloud shadow is gone; mirror the delete locally.
                    let delete = SyncRequest::cloud_delete(
                        key.thing_name.clone(),
                        key.shadow_name.clone(),
                        (row.cloud_version + 1) as u64,
                    );
                    Box::pin(execute(context, &delete)).await
                }
            }
        }
        SyncAction::OverwriteCloud => {
            let local = documents::get(&context.pool, &key.thing_name, &key.shadow_name)
                .await
                .map_err(store_error)?
                .map(|bytes| ShadowDocument::from_bytes(&bytes))
                .transpose()?;
            match local {
                Some(document) => {
                    let payload = full_state_payload(&document);
                    push_update_to_cloud(context, key, payload, document.version).await
                }
                None => {
                    let row = load_row(context, key).await?;
                    let delete = SyncRequest::local_delete(
                        key.thing_name.clone(),
                        key.shadow_name.clone(),
                        row.local_version.max(0) as u64,
                    );
                    Box::pin(execute(context, &delete)).await
                }
            }
        }
    }
}

async fn load_row(
    context: &SyncContext,
    key: &ShadowKey,
) -> Result<sync_info::SyncRow, ShadowError> {
    sync_info::get_row(&context.pool, &key.thing_name, &key.shadow_name)
        .await
        .map_err(store_error)?
        .ok_or_else(|| {
            ShadowError::UnknownShadow(format!("{}/{}", key.thing_name, key.shadow_name))
        })
}

/// Publish a local patch to the cloud and advance the sync row.
async fn push_update_to_cloud(
    context: &SyncContext,
    key: &ShadowKey,
    mut payload: Value,
    local_version: u64,
) -> Result<(), ShadowError> {
    let mut row = load_row(context, key).await?;

    // Pin the last seen cloud version for optimistic concurrency.
    if row.cloud_version > 0 && !row.cloud_deleted {
        payload["version"] = json!(row.cloud_version);
    }
    // A fresh token lets the cloud echo be correlated with this push.
    payload["clientToken"] = json!(uuid::Uuid::now_v7().to_string());

    context.outbound.acquire("cloud")?;
    let cloud_version = context
        .cloud
        .update_shadow(&key.thing_name, &key.shadow_name, &payload)
        .await?;

    row.local_version = local_version as i64;
    row.cloud_version = cloud_version
        .map(|v| v as i64)
        .unwrap_or(row.cloud_version + 1);
    row.cloud_deleted = false;
    row.last_synced_document = documents::get(&context.pool, &key.thing_name, &key.shadow_name)
        .await
        .map_err(store_error)?;
    row.last_sync_time = Utc::now().timestamp();
    sync_info::update_row(&context.pool, &row)
        .await
        .map_err(store_error)
}

/// Make the local shadow equal to a cloud document snapshot, then record
/// the new watermarks.
async fn apply_cloud_document(
    context: &SyncContext,
    key: &ShadowKey,
    mut row: sync_info::SyncRow,
    document: &Value,
    cloud_version: u64,
) -> Result<(), ShadowError> {
    let local = documents::get(&context.pool, &key.thing_name, &key.shadow_name)
        .await
        .map_err(store_error)?
        .map(|bytes| ShadowDocument::from_bytes(&bytes))
        .transpose()?;

    let empty = json!({});
    let cloud_state = document.get("state").unwrap_or(&empty);
    let patch = overwrite_state_patch(local.as_ref(), cloud_state);

    let local_version = if patch_is_empty(&patch) {
        local.map(|d| d.version).unwrap_or(0)
    } else {
        let bytes =
            serde_json::to_vec(&patch).map_err(|e| ShadowError::Service(e.to_string()))?;
        let accepted = handle_update(
            &context.handlers,
            &key.thing_name,
            &key.shadow_name,
            &bytes,
            RequestSource::Sync,
        )
        .await?;
        serde_json::from_slice::<Value>(&accepted)
            .ok()
            .and_then(|v| v.get("version").and_then(Value::as_u64))
            .unwrap_or(0)
    };

    let now = Utc::now().timestamp();
    row.cloud_version = cloud_version as i64;
    row.local_version = local_version as i64;
    row.cloud_deleted = false;
    row.last_synced_document = serde_json::to_vec(document).ok();
    row.last_sync_time = now;
    row.cloud_update_time = now;
    sync_info::update_row(&context.pool, &row)
        .await
        .map_err(store_error)
}

/// Patch that turns `local` into `cloud`: cloud-only keys are inserted,
/// differing leaves replaced, local-only keys removed with explicit
/// nulls. `None` when the trees already agree.
fn overwrite_patch(local: &Value, cloud: &Value) -> Option<Value> {
    match (local, cloud) {
        (Value::Object(local_map), Value::Object(cloud_map)) => {
            let mut out = Map::new();
            for (key, cloud_value) in cloud_map {
                match local_map.get(key) {
                    None => {
                        out.insert(key.clone(), cloud_value.clone());
                    }
                    Some(local_value) => {
                        if let Some(patch) = overwrite_patch(local_value, cloud_value) {
                            out.insert(key.clone(), patch);
                        }
                    }
                }
            }
            for key in local_map.keys() {
                if !cloud_map.contains_key(key) {
                    out.insert(key.clone(), Value::Null);
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(Value::Object(out))
            }
        }
        _ => (local != cloud).then(|| cloud.clone()),
    }
}

fn overwrite_state_patch(local: Option<&ShadowDocument>, cloud_state: &Value) -> Value {
    let mut state = Map::new();
    let sections: [(&str, Option<&Value>); 2] = [
        ("desired", local.and_then(|d| d.state.desired.as_ref())),
        ("reported", local.and_then(|d| d.state.reported.as_ref())),
    ];
    for (name, local_section) in sections {
        let cloud_section = cloud_state.get(name).filter(|v| !v.is_null());
        match (local_section, cloud_section) {
            (None, None) => {}
            (Some(_), None) => {
                state.insert(name.into(), Value::Null);
            }
            (None, Some(cloud_section)) => {
                state.insert(name.into(), cloud_section.clone());
            }
            (Some(local_section), Some(cloud_section)) => {
                if let Some(patch) = overwrite_patch(local_section, cloud_section) {
                    state.insert(name.into(), patch);
                }
            }
        }
    }
    json!({ "state": state })
}

fn patch_is_empty(patch: &Value) -> bool {
    patch
        .get("state")
        .and_then(Value::as_object)
        .is_some_and(Map::is_empty)
}

fn full_state_payload(document: &ShadowDocument) -> Value {
    let mut state = Map::new();
    if let Some(desired) = &document.state.desired {
        state.insert("desired".into(), desired.clone());
    }
    if let Some(reported) = &document.state.reported {
        state.insert("reported".into(), reported.clone());
    }
    json!({ "state": state })
}

fn store_error(e: um_store::StoreError) -> ShadowError {
    ShadowError::Service(e.to_string())
}
