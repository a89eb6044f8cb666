//! Topic integrator: dispatches shadow requests arriving on the local
//! pub/sub bus into the request handlers.
//!
//! Response topics (`accepted`/`rejected`/`delta`/`documents`) are
//! filtered out so the service never consumes its own events. Business
//! errors from dispatch are swallowed here; they have already been
//! published on the matching `rejected` topic.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use um_channel::BusMessage;
use um_protocol::topics::{self, ShadowOp};

use crate::handlers::{HandlerContext, RequestSource, delete, get, update};

pub struct TopicRouter {
    ctx: Arc<HandlerContext>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TopicRouter {
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self {
            ctx,
            task: Mutex::new(None),
        }
    }

    /// Register the shadow topic consumer. Idempotent.
    pub async fn subscribe(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<BusMessage>();
        self.ctx.publisher.subscribe(tx).await;

        let ctx = self.ctx.clone();
        *task = Some(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                dispatch(&ctx, &message.topic, &message.payload).await;
            }
        }));
    }

    pub async fn unsubscribe(&self) {
        let Some(handle) = self.task.lock().await.take() else {
            return;
        };
        self.ctx.publisher.unsubscribe().await;
        handle.abort();
    }
}

/// Route one incoming bus message to the matching handler.
pub async fn dispatch(ctx: &HandlerContext, topic: &str, payload: &[u8]) {
    if topics::is_response_topic(topic) {
        return;
    }
    let Some(parsed) = topics::parse_shadow_topic(topic) else {
        tracing::debug!(topic = %topic, "ignoring unrecognized topic");
        return;
    };

    let result = match parsed.op {
        ShadowOp::Get => get::handle_get(ctx, &parsed.thing_name, &parsed.shadow_name)
            .await
            .map(drop),
        ShadowOp::Update => update::handle_update(
            ctx,
            &parsed.thing_name,
            &parsed.shadow_name,
            payload,
            RequestSource::Local,
        )
        .await
        .map(drop),
        ShadowOp::Delete => delete::handle_delete(
            ctx,
            &parsed.thing_name,
            &parsed.shadow_name,
            RequestSource::Local,
        )
        .await
        .map(drop),
    };

    if let Err(error) = result {
        // Already published on the rejected topic; nothing rethrows.
        tracing::debug!(topic = %topic, error = %error, "shadow request rejected");
    }
}
