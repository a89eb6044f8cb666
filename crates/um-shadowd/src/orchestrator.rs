//! Service lifecycle: install, startup, connectivity reactions, shutdown.
//!
//! The orchestrator owns the component graph. Handlers receive their
//! capabilities as plain fields; sync workers receive a `SyncContext`.
//! A failed install leaves the service errored with no subsystem started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::SqlitePool;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use um_channel::{Channel, PubSub};
use um_protocol::errors::ShadowError;
use um_store::sync as sync_info;

use crate::auth::Authorizer;
use crate::config::ServiceConfig;
use crate::configurator;
use crate::handlers::HandlerContext;
use crate::lockmap::ShadowLocks;
use crate::ops::LocalOperations;
use crate::publisher::ShadowPublisher;
use crate::ratelimit::RateLimiter;
use crate::router::TopicRouter;
use crate::sync::cloud::{self, CloudClient, CloudDataClient};
use crate::sync::direction::{DirectionWrapper, SyncDirection};
use crate::sync::queue::{DEFAULT_CAPACITY, RequestQueue};
use crate::sync::requests::ShadowKey;
use crate::sync::workers::{SyncContext, SyncStrategy, SyncWorkers};
use crate::sync::SyncGate;
use crate::token::TokenCipher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Installed,
    Running,
    Stopped,
}

/// External collaborators injected at install time.
pub struct Dependencies {
    pub bus: Arc<dyn PubSub>,
    pub cloud_channel: Arc<dyn Channel>,
    pub cloud_client: Arc<dyn CloudClient>,
    pub authorizer: Arc<dyn Authorizer>,
}

pub struct ShadowManager {
    config: ServiceConfig,
    state: Mutex<ServiceState>,
    pool: SqlitePool,
    ctx: Arc<HandlerContext>,
    operations: Arc<LocalOperations>,
    router: Arc<TopicRouter>,
    workers: Arc<SyncWorkers>,
    data_client: Arc<CloudDataClient>,
    gate: Arc<SyncGate>,
    direction: DirectionWrapper,
    connected: AtomicBool,
}

impl ShadowManager {
    /// Validate configuration, open the store, and wire the component
    /// graph. Nothing is started; an error here means the service is
    /// errored and must not serve.
    pub async fn install(
        config: ServiceConfig,
        deps: Dependencies,
    ) -> Result<Arc<Self>, ShadowError> {
        config.validate()?;

        let pool = if config.store.db_path == ":memory:" {
            um_store::connect_in_memory().await
        } else {
            um_store::connect(&config.store.db_path).await
        }
        .map_err(|e| ShadowError::Service(format!("failed to open shadow store: {e}")))?;

        let direction = DirectionWrapper::new(config.synchronize.direction);
        let queue = Arc::new(RequestQueue::new(DEFAULT_CAPACITY));
        let gate = Arc::new(SyncGate::new(queue.clone(), direction.clone()));
        gate.set_sync_set(configurator::build_sync_set(
            &config.synchronize,
            &config.thing_name,
        )?);

        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limits.max_total_local_requests_rate,
            config.rate_limits.max_local_requests_rate_per_thing,
        ));
        let publisher = Arc::new(ShadowPublisher::new(deps.bus.clone()));
        let ctx = Arc::new(HandlerContext::new(
            pool.clone(),
            publisher,
            deps.authorizer,
            rate_limiter,
            Arc::new(ShadowLocks::new()),
            gate.clone(),
            Arc::new(TokenCipher::new()),
            config.limits.shadow_document_size_limit_bytes,
        ));

        let outbound = Arc::new(RateLimiter::new(
            config.rate_limits.max_outbound_sync_updates_per_second,
            0,
        ));
        let sync_context = Arc::new(SyncContext {
            pool: pool.clone(),
            handlers: ctx.clone(),
            cloud: deps.cloud_client,
            outbound,
        });
        let workers = Arc::new(SyncWorkers::new(
            queue,
            sync_context,
            SyncStrategy::from(&config.synchronize.strategy),
            1,
        ));
        let data_client = Arc::new(CloudDataClient::new(deps.cloud_channel));
        let router = Arc::new(TopicRouter::new(ctx.clone()));
        let operations = Arc::new(LocalOperations::new(ctx.clone()));

        tracing::info!(
            thing_name = %config.thing_name,
            synced_shadows = gate.sync_set().len(),
            "shadow manager installed"
        );

        Ok(Arc::new(Self {
            config,
            state: Mutex::new(ServiceState::Installed),
            pool,
            ctx,
            operations,
            router,
            workers,
            data_client,
            gate,
            direction,
            connected: AtomicBool::new(false),
        }))
    }

    /// Register the local pub/sub consumer. Idempotent.
    pub async fn post_inject(&self) {
        self.router.subscribe().await;
    }

    /// The IPC operation surface the host runtime exposes to clients.
    pub fn operations(&self) -> Arc<LocalOperations> {
        self.operations.clone()
    }

    pub fn handler_context(&self) -> Arc<HandlerContext> {
        self.ctx.clone()
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.lock().await
    }

    /// Reconcile sync rows with the configured set and go live. Workers
    /// and cloud subscriptions start only once the cloud session is up.
    pub async fn startup(&self) -> Result<(), ShadowError> {
        self.reconcile_sync_rows().await?;
        *self.state.lock().await = ServiceState::Running;
        if self.connected.load(Ordering::SeqCst) {
            self.start_sync_plane().await;
        }
        tracing::info!("shadow manager running");
        Ok(())
    }

    async fn reconcile_sync_rows(&self) -> Result<(), ShadowError> {
        let set = self.gate.sync_set();
        let rows = sync_info::list_rows(&self.pool)
            .await
            .map_err(|e| ShadowError::Service(e.to_string()))?;

        for row in &rows {
            if !set.contains(&ShadowKey::new(
                row.thing_name.as_str(),
                row.shadow_name.as_str(),
            )) {
                sync_info::delete_row(&self.pool, &row.thing_name, &row.shadow_name)
                    .await
                    .map_err(|e| ShadowError::Service(e.to_string()))?;
            }
        }
        for key in &set {
            sync_info::insert_if_absent(
                &self.pool,
                &sync_info::SyncRow::new(key.thing_name.clone(), key.shadow_name.clone()),
            )
            .await
            .map_err(|e| ShadowError::Service(e.to_string()))?;
        }
        Ok(())
    }

    async fn start_sync_plane(&self) {
        if self.direction.allows_cloud_to_device() {
            self.data_client
                .update_subscriptions(&self.gate.sync_set())
                .await;
        } else {
            self.data_client.stop_subscribing().await;
        }
        self.workers.start().await;
    }

    /// Cloud session established: bring up workers and subscriptions.
    pub async fn on_connected(&self) {
        self.connected.store(true, Ordering::SeqCst);
        if *self.state.lock().await == ServiceState::Running {
            self.start_sync_plane().await;
        }
    }

    /// Cloud session lost: stop the sync plane but retain queued
    /// requests so short disconnects lose nothing.
    pub async fn on_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.workers.stop().await;
        self.data_client.stop_subscribing().await;
    }

    /// Change the sync direction: stop workers, clear pending requests,
    /// rebuild subscriptions, restart.
    pub async fn set_direction(&self, direction: SyncDirection) {
        if self.direction.get() == direction {
            return;
        }
        tracing::info!(?direction, "sync direction changed, restarting sync plane");
        self.workers.stop().await;
        self.gate.queue.clear().await;
        self.direction.set(direction);

        if *self.state.lock().await == ServiceState::Running
            && self.connected.load(Ordering::SeqCst)
        {
            self.start_sync_plane().await;
        } else if !self.direction.allows_cloud_to_device() {
            self.data_client.stop_subscribing().await;
        }
    }

    /// Rebuild the sync set after a platform thing-name change.
    pub async fn update_core_thing_name(&self, thing_name: &str) -> Result<(), ShadowError> {
        let set = configurator::build_sync_set(&self.config.synchronize, thing_name)?;
        self.gate.set_sync_set(set);
        self.reconcile_sync_rows().await?;
        if self.connected.load(Ordering::SeqCst) && self.direction.allows_cloud_to_device() {
            self.data_client
                .update_subscriptions(&self.gate.sync_set())
                .await;
        }
        Ok(())
    }

    /// Follow a platform thing-name watch channel for the lifetime of
    /// the manager.
    pub fn watch_core_thing_name(
        self: &Arc<Self>,
        mut rx: watch::Receiver<String>,
    ) -> JoinHandle<()> {
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let thing_name = rx.borrow().clone();
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.update_core_thing_name(&thing_name).await {
                    tracing::warn!(error = %e, "failed to apply thing name change");
                }
            }
        })
    }

    /// Route an incoming cloud publish into the sync queue.
    pub async fn handle_cloud_message(&self, topic: &str, payload: &[u8]) {
        if let Some(request) = cloud::classify_cloud_message(topic, payload) {
            self.gate.enqueue_cloud(request).await;
        }
    }

    /// Stop everything. Idempotent; close errors are swallowed.
    pub async fn shutdown(&self) {
        {
            let state = self.state.lock().await;
            if *state == ServiceState::Stopped {
                return;
            }
        }
        self.workers.stop().await;
        self.ctx.rate_limiter.clear();
        self.router.unsubscribe().await;
        self.data_client.stop_subscribing().await;
        self.pool.close().await;
        *self.state.lock().await = ServiceState::Stopped;
        tracing::info!("shadow manager stopped");
    }
}
