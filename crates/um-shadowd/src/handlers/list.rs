//! List handler: paginated named-shadow listing.

use chrono::Utc;

use um_protocol::errors::ShadowError;
use um_protocol::ipc::{ListNamedShadowsForThingRequest, ListNamedShadowsForThingResponse};
use um_protocol::validator::validate_thing_name;
use um_store::documents;

use crate::handlers::{HandlerContext, service_error};

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;

/// List named shadows for a thing, lexicographic ascending.
///
/// `next_token` is present exactly when the page came back full; it
/// encodes the thing and the next offset, and is rejected when replayed
/// for a different thing.
pub async fn handle_list(
    ctx: &HandlerContext,
    request: &ListNamedShadowsForThingRequest,
) -> Result<ListNamedShadowsForThingResponse, ShadowError> {
    let thing_name = &request.thing_name;
    validate_thing_name(thing_name)?;
    ctx.authorizer
        .authorize("ListNamedShadowsForThing", thing_name, "")
        .await?;
    ctx.rate_limiter.acquire(thing_name)?;

    let page_size = request.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(ShadowError::InvalidArguments(format!(
            "pageSize argument must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }

    let offset = match &request.next_token {
        Some(token) => ctx.token_cipher.decode(token, thing_name)?,
        None => 0,
    };

    let results = documents::list_named_shadows(&ctx.pool, thing_name, offset, page_size)
        .await
        .map_err(service_error)?;

    let next_token = if results.len() as u32 == page_size {
        Some(ctx.token_cipher.encode(thing_name, offset + page_size)?)
    } else {
        None
    };

    Ok(ListNamedShadowsForThingResponse {
        results,
        timestamp: Utc::now().timestamp(),
        next_token,
    })
}
