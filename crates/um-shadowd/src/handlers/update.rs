//! Update handler: validate, merge, persist, publish, enqueue sync.

use chrono::Utc;
use serde_json::{Map, Value, json};

use um_protocol::document::{ShadowDocument, delta_event_payload, documents_event_payload};
use um_protocol::errors::ShadowError;
use um_protocol::merge::merge_document;
use um_protocol::topics::ShadowOp;
use um_protocol::validator::validate_update_payload;
use um_store::documents;

use crate::handlers::{HandlerContext, RequestSource, preflight, service_error};

/// Apply an update payload to a shadow.
///
/// On success publishes `accepted`, then `delta` when non-empty, then
/// `documents`, in that order, and enqueues device-to-cloud sync work
/// when the shadow is synchronized.
pub async fn handle_update(
    ctx: &HandlerContext,
    thing_name: &str,
    shadow_name: &str,
    payload: &[u8],
    source: RequestSource,
) -> Result<Vec<u8>, ShadowError> {
    match update_inner(ctx, thing_name, shadow_name, payload, source).await {
        Ok(accepted) => Ok(accepted),
        Err(error) => {
            ctx.publisher
                .rejected(thing_name, shadow_name, ShadowOp::Update, &error)
                .await;
            Err(error)
        }
    }
}

async fn update_inner(
    ctx: &HandlerContext,
    thing_name: &str,
    shadow_name: &str,
    payload: &[u8],
    source: RequestSource,
) -> Result<Vec<u8>, ShadowError> {
    preflight(ctx, "UpdateThingShadow", thing_name, shadow_name, source).await?;

    let update = validate_update_payload(payload, ctx.doc_size_limit())?;

    let _guard = ctx.locks.acquire(thing_name, shadow_name).await;

    let existing = documents::get(&ctx.pool, thing_name, shadow_name)
        .await
        .map_err(service_error)?
        .map(|bytes| ShadowDocument::from_bytes(&bytes))
        .transpose()?;

    let now = Utc::now().timestamp();
    let outcome = merge_document(existing.as_ref(), &update, now)?;
    let document = &outcome.document;

    documents::update(
        &ctx.pool,
        thing_name,
        shadow_name,
        &document.to_bytes(),
        document.version,
    )
    .await
    .map_err(service_error)?;

    let client_token = update.client_token.as_deref();
    let accepted = document.response_payload(now, client_token);
    ctx.publisher
        .accepted(thing_name, shadow_name, ShadowOp::Update, &accepted)
        .await;

    if let Some(delta) = &outcome.delta {
        let payload = delta_event_payload(
            delta,
            document.desired_metadata(),
            document.version,
            now,
            client_token,
        );
        ctx.publisher.delta(thing_name, shadow_name, &payload).await;
    }

    let documents_payload = documents_event_payload(
        outcome.previous.as_ref(),
        Some(document),
        now,
        client_token,
    );
    ctx.publisher
        .documents(thing_name, shadow_name, ShadowOp::Update, &documents_payload)
        .await;

    if source == RequestSource::Local {
        ctx.sync_gate
            .notify_local_update(
                thing_name,
                shadow_name,
                sync_patch(&update.desired, &update.reported),
                document.version,
            )
            .await;
    }

    Ok(accepted)
}

/// Rebuild the state patch for the sync queue, keeping explicit nulls so
/// removals reach the cloud.
fn sync_patch(desired: &Option<Value>, reported: &Option<Value>) -> Value {
    let mut state = Map::new();
    if let Some(desired) = desired {
        state.insert("desired".into(), desired.clone());
    }
    if let Some(reported) = reported {
        state.insert("reported".into(), reported.clone());
    }
    json!({ "state": state })
}
