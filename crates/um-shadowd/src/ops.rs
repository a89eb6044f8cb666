//! Local IPC operation surface.
//!
//! The host runtime registers these four operations for local clients;
//! each maps a request DTO through the matching handler and back.

use std::sync::Arc;

use um_protocol::errors::ShadowError;
use um_protocol::ipc::{
    DeleteThingShadowRequest, DeleteThingShadowResponse, GetThingShadowRequest,
    GetThingShadowResponse, ListNamedShadowsForThingRequest, ListNamedShadowsForThingResponse,
    UpdateThingShadowRequest, UpdateThingShadowResponse,
};

use crate::handlers::{HandlerContext, RequestSource, delete, get, list, update};

pub struct LocalOperations {
    ctx: Arc<HandlerContext>,
}

impl LocalOperations {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    pub async fn get_thing_shadow(
        &self,
        request: GetThingShadowRequest,
    ) -> Result<GetThingShadowResponse, ShadowError> {
        let payload =
            get::handle_get(&self.ctx, &request.thing_name, &request.shadow_name).await?;
        Ok(GetThingShadowResponse { payload })
    }

    pub async fn update_thing_shadow(
        &self,
        request: UpdateThingShadowRequest,
    ) -> Result<UpdateThingShadowResponse, ShadowError> {
        let payload = update::handle_update(
            &self.ctx,
            &request.thing_name,
            &request.shadow_name,
            &request.payload,
            RequestSource::Local,
        )
        .await?;
        Ok(UpdateThingShadowResponse { payload })
    }

    pub async fn delete_thing_shadow(
        &self,
        request: DeleteThingShadowRequest,
    ) -> Result<DeleteThingShadowResponse, ShadowError> {
        let payload = delete::handle_delete(
            &self.ctx,
            &request.thing_name,
            &request.shadow_name,
            RequestSource::Local,
        )
        .await?;
        Ok(DeleteThingShadowResponse { payload })
    }

    pub async fn list_named_shadows_for_thing(
        &self,
        request: ListNamedShadowsForThingRequest,
    ) -> Result<ListNamedShadowsForThingResponse, ShadowError> {
        list::handle_list(&self.ctx, &request).await
    }
}
