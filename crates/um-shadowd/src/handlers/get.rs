//! Get handler: fetch a shadow document.

use chrono::Utc;

use um_protocol::document::ShadowDocument;
use um_protocol::errors::ShadowError;
use um_protocol::topics::ShadowOp;
use um_store::documents;

use crate::handlers::{HandlerContext, RequestSource, preflight, service_error};

/// Fetch a shadow and publish the outcome on the get response topics.
///
/// The returned payload is the full document with its computed delta and
/// a fresh timestamp.
pub async fn handle_get(
    ctx: &HandlerContext,
    thing_name: &str,
    shadow_name: &str,
) -> Result<Vec<u8>, ShadowError> {
    match get_inner(ctx, thing_name, shadow_name).await {
        Ok(payload) => {
            ctx.publisher
                .accepted(thing_name, shadow_name, ShadowOp::Get, &payload)
                .await;
            Ok(payload)
        }
        Err(error) => {
            ctx.publisher
                .rejected(thing_name, shadow_name, ShadowOp::Get, &error)
                .await;
            Err(error)
        }
    }
}

async fn get_inner(
    ctx: &HandlerContext,
    thing_name: &str,
    shadow_name: &str,
) -> Result<Vec<u8>, ShadowError> {
    preflight(ctx, "GetThingShadow", thing_name, shadow_name, RequestSource::Local).await?;

    let stored = documents::get(&ctx.pool, thing_name, shadow_name)
        .await
        .map_err(service_error)?
        .ok_or_else(|| ShadowError::shadow_not_found(shadow_name))?;

    let document = ShadowDocument::from_bytes(&stored)?;
    Ok(document.response_payload(Utc::now().timestamp(), None))
}
