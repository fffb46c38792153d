//! Callbacks the host invokes on the plugin.

use {
    async_trait::async_trait,
    axum::{body::Body, http::Request, response::Response},
    parley_common::{ChatEvent, EventContext, Post},
};

use crate::error::Result;

/// Host-facing lifecycle, event and HTTP hooks.
///
/// Event hooks return once the event has been admitted or dropped; the
/// answer itself is produced in the background.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    async fn on_activate(&self) -> Result<()>;

    async fn on_deactivate(&self) -> Result<()>;

    /// The host saved a new configuration document.
    async fn on_configuration_change(&self) -> Result<()>;

    async fn message_has_been_posted(&self, ctx: &EventContext, post: Post);

    async fn message_has_been_updated(&self, ctx: &EventContext, old: Post, new: Post);

    /// Requests under the plugin's URL prefix, with the prefix stripped.
    async fn serve_http(&self, ctx: &EventContext, req: Request<Body>) -> Response;

    async fn serve_metrics(&self, ctx: &EventContext, req: Request<Body>) -> Response;

    /// Route a decoded chat event to the matching message hook.
    async fn dispatch(&self, ctx: &EventContext, event: ChatEvent) {
        match event {
            ChatEvent::MessagePosted { post } => self.message_has_been_posted(ctx, post).await,
            ChatEvent::MessageUpdated { old, new } => {
                self.message_has_been_updated(ctx, old, new).await
            },
        }
    }
}
