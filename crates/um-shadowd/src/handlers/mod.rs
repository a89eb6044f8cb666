//! Local request handlers for Get/Update/Delete/List.
//!
//! Every handler runs the same preflight: name validation, authorization,
//! rate limiting. Writers then serialize on the per-shadow lock. Failures
//! are published on the matching `rejected` topic before returning.

pub mod delete;
pub mod get;
pub mod list;
pub mod update;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use sqlx::SqlitePool;

use um_protocol::errors::ShadowError;
use um_protocol::validator::{validate_shadow_name, validate_thing_name};

use crate::auth::Authorizer;
use crate::lockmap::ShadowLocks;
use crate::publisher::ShadowPublisher;
use crate::ratelimit::RateLimiter;
use crate::sync::SyncGate;
use crate::token::TokenCipher;

/// Where a request came from.
///
/// Sync-originated writes skip authorization and rate limiting and do
/// not re-enter the sync queue, otherwise a cloud-applied update would
/// bounce straight back to the cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSource {
    Local,
    Sync,
}

/// Capabilities shared by every handler.
pub struct HandlerContext {
    pub pool: SqlitePool,
    pub publisher: Arc<ShadowPublisher>,
    pub authorizer: Arc<dyn Authorizer>,
    pub rate_limiter: Arc<RateLimiter>,
    pub locks: Arc<ShadowLocks>,
    pub sync_gate: Arc<SyncGate>,
    pub token_cipher: Arc<TokenCipher>,
    doc_size_limit: AtomicUsize,
}

impl HandlerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        publisher: Arc<ShadowPublisher>,
        authorizer: Arc<dyn Authorizer>,
        rate_limiter: Arc<RateLimiter>,
        locks: Arc<ShadowLocks>,
        sync_gate: Arc<SyncGate>,
        token_cipher: Arc<TokenCipher>,
        doc_size_limit: usize,
    ) -> Self {
        Self {
            pool,
            publisher,
            authorizer,
            rate_limiter,
            locks,
            sync_gate,
            token_cipher,
            doc_size_limit: AtomicUsize::new(doc_size_limit),
        }
    }

    pub fn doc_size_limit(&self) -> usize {
        self.doc_size_limit.load(Ordering::Relaxed)
    }

    pub fn set_doc_size_limit(&self, limit: usize) {
        self.doc_size_limit.store(limit, Ordering::Relaxed);
    }
}

/// Name validation, authorization, and rate limiting common to every
/// handler. Sync-originated requests have already passed these gates on
/// their originating side.
pub(crate) async fn preflight(
    ctx: &HandlerContext,
    operation: &str,
    thing_name: &str,
    shadow_name: &str,
    source: RequestSource,
) -> Result<(), ShadowError> {
    validate_thing_name(thing_name)?;
    validate_shadow_name(shadow_name)?;

    if source == RequestSource::Sync {
        return Ok(());
    }
    ctx.authorizer
        .authorize(operation, thing_name, shadow_name)
        .await?;
    ctx.rate_limiter.acquire(thing_name)?;
    Ok(())
}

pub(crate) fn service_error(e: um_store::StoreError) -> ShadowError {
    ShadowError::Service(e.to_string())
}
