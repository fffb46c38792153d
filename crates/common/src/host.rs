//! Host application boundary.
//!
//! The orchestration core never talks to the chat platform directly; the
//! plugin shim hands it an implementation of [`HostApi`].

use {anyhow::Result, async_trait::async_trait, serde::Serialize};

use crate::types::{Channel, Post};

/// A reply the core wants the host to create.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NewPost {
    pub channel_id: String,
    pub root_id: String,
    /// Bot user id the post is created as.
    pub user_id: String,
    pub message: String,
}

/// Calls the orchestration core makes back into the host.
#[async_trait]
pub trait HostApi: Send + Sync {
    /// Make sure a bot account exists and return its user id.
    async fn ensure_bot(&self, username: &str, display_name: &str) -> Result<String>;

    async fn get_channel(&self, channel_id: &str) -> Result<Channel>;

    async fn get_post(&self, post_id: &str) -> Result<Post>;

    /// Create a post and return its id.
    async fn create_post(&self, post: NewPost) -> Result<String>;

    /// Replace the message of an existing post.
    async fn update_post(&self, post_id: &str, message: &str) -> Result<()>;
}
