//! Delete handler: remove a shadow and publish its last state.

use chrono::Utc;
use serde_json::json;

use um_protocol::document::{ShadowDocument, documents_event_payload};
use um_protocol::errors::ShadowError;
use um_protocol::topics::ShadowOp;
use um_store::documents;

use crate::handlers::{HandlerContext, RequestSource, preflight, service_error};

/// Delete a shadow.
///
/// On success publishes an empty `accepted` payload and a `documents`
/// event carrying only the previous document. The returned IPC payload
/// is `{"version": <deleted version>}`.
pub async fn handle_delete(
    ctx: &HandlerContext,
    thing_name: &str,
    shadow_name: &str,
    source: RequestSource,
) -> Result<Vec<u8>, ShadowError> {
    match delete_inner(ctx, thing_name, shadow_name, source).await {
        Ok(payload) => Ok(payload),
        Err(error) => {
            ctx.publisher
                .rejected(thing_name, shadow_name, ShadowOp::Delete, &error)
                .await;
            Err(error)
        }
    }
}

async fn delete_inner(
    ctx: &HandlerContext,
    thing_name: &str,
    shadow_name: &str,
    source: RequestSource,
) -> Result<Vec<u8>, ShadowError> {
    preflight(ctx, "DeleteThingShadow", thing_name, shadow_name, source).await?;

    let _guard = ctx.locks.acquire(thing_name, shadow_name).await;

    let removed = documents::delete(&ctx.pool, thing_name, shadow_name)
        .await
        .map_err(service_error)?
        .ok_or_else(|| ShadowError::shadow_not_found(shadow_name))?;

    let previous = ShadowDocument::from_bytes(&removed)?;
    let now = Utc::now().timestamp();

    ctx.publisher
        .accepted(thing_name, shadow_name, ShadowOp::Delete, b"")
        .await;
    let documents_payload = documents_event_payload(Some(&previous), None, now, None);
    ctx.publisher
        .documents(thing_name, shadow_name, ShadowOp::Delete, &documents_payload)
        .await;

    if source == RequestSource::Local {
        ctx.sync_gate
            .notify_local_delete(thing_name, shadow_name, previous.version)
            .await;
    }

    Ok(serde_json::to_vec(&json!({"version": previous.version})).unwrap_or_default())
}
